//! The VM's error taxonomy (spec section 7, `RuntimeError` row plus the
//! internal-error row for verifier/bytecode contradictions).

use ouro_core::diagnostic::RuntimeErrorKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeErrorKind),

    #[error("unknown function index {0}")]
    UnknownFunction(u32),

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("call-frame stack underflow")]
    FrameUnderflow,

    #[error("unknown constant-pool index {0}")]
    UnknownConstant(u32),

    #[error("unknown global slot {0}")]
    UnknownGlobal(u32),

    #[error("unknown opcode 0x{0:04x}")]
    UnknownOpcode(u16),

    #[error("bytecode stream truncated at offset {0}")]
    Truncated(u32),

    #[error("unhandled exception: {0}")]
    Unhandled(String),

    #[error("program bytecode failed verification: {0}")]
    Verify(String),

    /// A structural contradiction between the bytecode and the VM's own
    /// bookkeeping (e.g. a builder-stack opcode firing with no matching
    /// builder). Never expected from bytecode `CompiledProgram::verify()`
    /// accepted; distinguished from `RuntimeErrorKind` so the CLI can tag it
    /// as an internal error rather than a user-caused one.
    #[error("internal VM error: {0}")]
    Internal(String),
}
