//! Ouroboros Core: value model, diagnostics and the opcode table shared by
//! the compiler front end and the virtual machine.
//!
//! # Modules
//!
//! - `span`: source position tracking, shared by every compiler phase.
//! - `diagnostic`: the `ErrorKind` taxonomy (spec section 7) and the
//!   `Diagnostic` record the CLI driver renders to stderr.
//! - `value`: the tagged `Value` union (C8), number promotion and unit
//!   arithmetic rules.
//! - `opcode`: the bytecode instruction set, named so the emitter, the
//!   verifier and the VM dispatch loop all agree on one definition.
//! - `asmreg`: the inline-assembler register file, the single
//!   source-of-truth table mapping x86 mnemonics onto the 12 VM registers.

pub mod asmreg;
pub mod diagnostic;
pub mod opcode;
pub mod program;
pub mod span;
pub mod value;

pub use diagnostic::{Diagnostic, ErrorKind, RuntimeErrorKind};
pub use opcode::Opcode;
pub use program::{CompiledProgram, FunctionInfo, HandlerEntry};
pub use span::{SourceId, SourceMap, Span};
pub use value::{IterState, MapKey, Unit, Value};
