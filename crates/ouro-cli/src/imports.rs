//! Resolves a program's direct `import` statements into the name -> value
//! bindings `Emitter::compile_with_imports` needs (spec section 4.5/4.6).
//!
//! `ModuleLoader::load` already handles each imported module's own
//! transitive imports, compilation, single top-level run and memoization
//! internally, so this module only needs to walk the entry program's own
//! `import` items and merge what the loader publishes for each one.

use std::collections::HashMap;
use std::path::Path;

use ouro_compiler::ast::{Item, Program};
use ouro_compiler::loader::ModuleLoader;
use ouro_compiler::lexer::Lexer;
use ouro_compiler::parser::Parser;
use ouro_core::value::Value;
use ouro_core::SourceId;

use crate::CliError;

pub fn parse_source(text: &str) -> Program {
    let mut lexer = Lexer::new(text, SourceId(0));
    let tokens = lexer.tokenize();
    let mut parser = Parser::new(&tokens);
    parser.parse_program()
}

/// Resolves and runs every module `program` directly imports, returning
/// the merged name -> value bindings available to `program`'s own
/// top-level code.
pub fn resolve_imports(
    loader: &mut ModuleLoader,
    program: &Program,
    program_dir: &Path,
) -> Result<HashMap<String, Value>, CliError> {
    let mut bindings = HashMap::new();
    for item in &program.items {
        if let Item::Import { path, .. } = item {
            let canonical = loader.resolve(path, program_dir).map_err(|e| CliError::Module(e.to_string()))?;
            let record = loader.load(&canonical).map_err(|e| CliError::Module(e.to_string()))?;
            bindings.extend(record.exports);
        }
    }
    Ok(bindings)
}
