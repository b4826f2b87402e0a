//! Ouroboros VM: the bytecode interpreter and cooperative async scheduler
//! that execute a `CompiledProgram` produced by `ouro-compiler` (spec
//! section 4.6, "Virtual Machine").
//!
//! # Modules
//!
//! - `error`: the VM's error taxonomy.
//! - `frame`: a call frame (locals, resume point, finalizers).
//! - `builder`: the collection/accumulator builder stack backing
//!   `NEW_LIST`/`NEW_MAP`/`NEW_ACC`.
//! - `memory`: byte-addressable memory backing `@low`-register pointer code.
//! - `vm`: the fetch-decode-execute loop.
//! - `scheduler`: round-robin cooperative scheduling of multiple `Vm` tasks.

pub mod builder;
pub mod error;
pub mod frame;
pub mod memory;
pub mod scheduler;
pub mod vm;

pub use error::VmError;
pub use scheduler::{Scheduler, TaskId, TaskResult};
pub use vm::{RunOutcome, Suspend, Vm};

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_core::Value;
    use std::rc::Rc;

    #[test]
    fn compiles_and_runs_a_small_program_end_to_end() {
        let program = ouro_compiler::compile("fn double(x) { return x * 2; } return double(21);", "inline.ouro").unwrap();
        let mut vm = Vm::new(Rc::new(program));
        let outcome = vm.run().unwrap();
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(42))));
    }
}
