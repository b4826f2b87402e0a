//! A call frame: everything restored when a call returns (spec section 4.6,
//! "call-frame stack").

use std::rc::Rc;

use ouro_core::value::Foreign;

/// One active invocation: locals, the caller's resume point, and the
/// resources this invocation scoped for cleanup on exit.
pub struct Frame {
    pub fn_index: u32,
    /// Offset (global, into the shared bytecode stream) of the next
    /// instruction to execute in this frame.
    pub pc: u32,
    /// Where the caller resumes once this frame returns; `None` for the
    /// outermost frame (there is no caller to resume).
    pub return_pc: Option<u32>,
    pub locals: Vec<ouro_core::value::Value>,
    /// Depth of `self.builders`/`self.frames` (operand-stack height isn't
    /// tracked per frame; the stack-machine model assumes every expression
    /// leaves the stack balanced) at the moment this frame was entered, so
    /// an exception unwind can trim back to it.
    pub stack_base: usize,
    /// Resources (file handles, sockets, ...) registered for release on
    /// every exit path from this frame: normal return, exception unwind,
    /// cancellation.
    pub finalizers: Vec<Rc<dyn Foreign>>,
}

impl Frame {
    pub fn new(fn_index: u32, pc: u32, return_pc: Option<u32>, locals: Vec<ouro_core::value::Value>, stack_base: usize) -> Self {
        Frame {
            fn_index,
            pc,
            return_pc,
            locals,
            stack_base,
            finalizers: Vec::new(),
        }
    }

    pub fn run_finalizers(&mut self) {
        for res in self.finalizers.drain(..) {
            res.close();
        }
    }
}
