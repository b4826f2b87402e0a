//! Ouroboros compiler front end: lexer, parser, inline assembler, bytecode
//! emitter and module loader.
//!
//! # Pipeline
//!
//! `source text -> Lexer -> [Token] -> Parser -> ast::Program -> Emitter ->
//! ouro_core::program::CompiledProgram`
//!
//! `@asm { ... }` blocks bypass the parser's expression grammar entirely:
//! the lexer captures their body verbatim and the emitter hands it to
//! `asm::Assembler` for two-pass assembly, splicing the resulting bytes
//! directly into the surrounding function.
//!
//! `loader::ModuleLoader` sits above this pipeline, resolving `import`
//! paths to canonical files and memoizing each compiled module so a module
//! imported from two places only runs its top-level code once.

pub mod ast;
pub mod asm;
pub mod emitter;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod token;

pub use asm::{AsmError, Assembler};
pub use emitter::{CompileError, Emitter};
pub use lexer::{LexError, Lexer};
pub use loader::{ModuleError, ModuleLoader};
pub use parser::{ParseError, Parser};

use ouro_core::program::CompiledProgram;
use ouro_core::SourceId;

/// Compile one self-contained source string with no module resolution
/// (used by the CLI's single-file mode and by tests).
pub fn compile(source: &str, file_name: &str) -> Result<CompiledProgram, CompileError> {
    loader::compile_source(source, SourceId(0), file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_small_program_end_to_end() {
        let program = compile("let x = 1; let y = x + 2;", "inline.ouro").unwrap();
        assert!(!program.bytecode.is_empty());
        program.verify().unwrap();
    }
}
