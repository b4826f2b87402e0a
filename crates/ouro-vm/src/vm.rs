//! The bytecode interpreter (spec section 4.6/5, "Virtual Machine").
//!
//! `Vm` owns everything the fetch-decode-execute loop touches: the operand
//! stack, the call-frame stack, globals, the collection/accumulator builder
//! stack and the low-register memory arena. There is no native Rust
//! recursion across guest calls — `CALL`/`RET` push and pop entries on
//! `self.frames` directly — so the entire continuation for a suspended
//! `async` task is just this struct. `AWAIT`/`YIELD` return early from
//! `run()` with `RunOutcome::Suspended`; resuming a task is nothing more
//! than calling `run()` again (see `scheduler::Scheduler`).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use ouro_core::asmreg::REGISTER_COUNT;
use ouro_core::program::{CompiledProgram, Constant, HandlerEntry};
use ouro_core::value::{FunctionRef, IterState, OrderedMap, StructValue, TypedPointer};
use ouro_core::{Opcode, RuntimeErrorKind, Value};

use crate::builder::{AccKind, Builder};
use crate::error::VmError;
use crate::frame::Frame;
use crate::memory::Memory;

/// Why `run()` returned without the program halting or throwing.
#[derive(Debug, Clone)]
pub enum Suspend {
    Await,
    Yield(Value),
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Halted(Value),
    Suspended(Suspend),
    Threw(Value),
}

pub struct Vm {
    program: Rc<CompiledProgram>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Vec<Value>,
    /// The `@asm` register file (`R0..R7, SP, FP, PC, ACC`); `mov` writes
    /// through here in addition to the operand stack, and guest code reads
    /// a slot back with the `register(n)` intrinsic (spec section 4.2).
    registers: Vec<Value>,
    builders: Vec<Builder>,
    memory: Memory,
    cancelled: bool,
    last_cmp: Option<std::cmp::Ordering>,
    output: Box<dyn Write>,
}

impl Vm {
    pub fn new(program: Rc<CompiledProgram>) -> Self {
        Vm::with_output(program, Box::new(std::io::stdout()))
    }

    /// Construct a `Vm` that writes `print` output to `output` instead of
    /// stdout — used by tests to capture what the guest printed.
    pub fn with_output(program: Rc<CompiledProgram>, output: Box<dyn Write>) -> Self {
        let globals = vec![Value::Null; program.global_count as usize];
        Vm {
            program,
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            registers: vec![Value::Int(0); REGISTER_COUNT],
            builders: Vec::new(),
            memory: Memory::new(),
            cancelled: false,
            last_cmp: None,
            output,
        }
    }

    /// Request cancellation: the next suspension point (or the next `run()`
    /// call, if the task is already suspended) raises `Cancelled` instead
    /// of resuming. A no-op if the task already halted or threw.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Read a global slot's current value (spec section 4.5, module
    /// exports): after a module's `<module>` function has run, this is how
    /// the loader reads back an `export let`/`export const` binding's value
    /// to populate the module record's exports map.
    pub fn global(&self, slot: u32) -> Option<Value> {
        self.globals.get(slot as usize).cloned()
    }

    /// Run until the program halts, throws an unhandled exception, or
    /// suspends at `await`/`yield`. Call again to resume exactly where a
    /// suspension left off.
    pub fn run(&mut self) -> Result<RunOutcome, VmError> {
        if self.cancelled {
            while let Some(mut f) = self.frames.pop() {
                f.run_finalizers();
            }
            return Err(VmError::Runtime(RuntimeErrorKind::Cancelled));
        }
        if self.frames.is_empty() {
            self.enter_call(0, Vec::new())?;
        }
        let program = self.program.clone();
        loop {
            let fn_index = self.frames.last().unwrap().fn_index;
            let mut cursor = self.frames.last().unwrap().pc;
            let insn_start = cursor;
            let opcode = read_opcode(&program.bytecode, &mut cursor)?;

            macro_rules! operand {
                () => {
                    read_operand(&program.bytecode, &mut cursor)?
                };
            }

            match opcode {
                Opcode::PUSH => {
                    let idx = operand!() as u32;
                    let v = self.constant_value(&program, idx)?;
                    self.push(v);
                }
                Opcode::POP => {
                    self.pop()?;
                }
                Opcode::DUP => {
                    let v = self.top()?.clone();
                    self.push(v);
                }
                Opcode::SWAP => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(VmError::StackUnderflow);
                    }
                    self.stack.swap(len - 1, len - 2);
                }

                Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV | Opcode::MOD | Opcode::POW => {
                    self.binary_arith(opcode)?;
                }
                Opcode::NEG => {
                    let v = self.pop()?;
                    let result = match v {
                        Value::Int(n) => Value::Int(n.wrapping_neg()),
                        Value::Float(n) => Value::Float(-n),
                        other => {
                            return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                                expected: "numeric operand".to_string(),
                                found: other.type_name().to_string(),
                            }))
                        }
                    };
                    self.push(result);
                }
                Opcode::IMUL => self.binary_arith(Opcode::MUL)?,
                Opcode::IDIV => self.binary_arith(Opcode::DIV)?,
                Opcode::SAR => {
                    let (a, b) = self.pop_int_pair()?;
                    self.push(Value::Int(a.wrapping_shr(b as u32 & 63)));
                }

                Opcode::AND | Opcode::OR | Opcode::XOR | Opcode::SHL | Opcode::SHR | Opcode::ROL | Opcode::ROR => {
                    self.bitwise(opcode)?;
                }
                Opcode::NOT => {
                    let v = self.pop()?;
                    let result = match v {
                        Value::Int(n) => Value::Int(!n),
                        Value::Bool(b) => Value::Bool(!b),
                        other => {
                            return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                                expected: "int or bool operand".to_string(),
                                found: other.type_name().to_string(),
                            }))
                        }
                    };
                    self.push(result);
                }

                Opcode::EQ => {
                    let (a, b) = self.pop_pair()?;
                    self.push(Value::Bool(a.structural_eq(&b)));
                }
                Opcode::NE => {
                    let (a, b) = self.pop_pair()?;
                    self.push(Value::Bool(!a.structural_eq(&b)));
                }
                Opcode::LT | Opcode::GT | Opcode::LE | Opcode::GE => {
                    self.ordering_compare(opcode)?;
                }
                Opcode::CMP => {
                    let (a, b) = self.pop_pair()?;
                    self.last_cmp = Some(compare_values(&a, &b)?);
                }
                Opcode::TEST => {
                    let a = self.pop()?;
                    self.last_cmp = Some(if a.is_truthy() {
                        std::cmp::Ordering::Greater
                    } else {
                        std::cmp::Ordering::Equal
                    });
                }

                Opcode::JMP => {
                    let rel = operand!();
                    cursor = (insn_start as i64 + rel) as u32;
                }
                Opcode::JZ => {
                    let rel = operand!();
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        cursor = (insn_start as i64 + rel) as u32;
                    }
                }
                Opcode::JNZ => {
                    let rel = operand!();
                    let cond = self.pop()?;
                    if cond.is_truthy() {
                        cursor = (insn_start as i64 + rel) as u32;
                    }
                }
                Opcode::JE | Opcode::JNE | Opcode::JL | Opcode::JG | Opcode::JA | Opcode::JB
                | Opcode::JAE | Opcode::JBE | Opcode::JO | Opcode::JNO | Opcode::JS | Opcode::JNS => {
                    let rel = operand!();
                    if self.flag_condition(opcode) {
                        cursor = (insn_start as i64 + rel) as u32;
                    }
                }

                Opcode::CALL => {
                    let raw = operand!();
                    self.frames.last_mut().unwrap().pc = cursor;
                    if raw >= 0 {
                        let fn_index = raw as u32;
                        let argc = self.function_info(fn_index)?.parameter_count as usize;
                        let args = self.pop_n(argc)?;
                        self.enter_call(fn_index, args)?;
                    } else {
                        let argc = (-raw - 1) as usize;
                        let mut args = self.pop_n(argc)?;
                        let callee = self.pop()?;
                        let fn_index = match callee {
                            Value::Function(f) => f.fn_index,
                            Value::BoundMethod(b) => {
                                args.insert(0, b.receiver.clone());
                                b.function.fn_index
                            }
                            other => {
                                return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                                    expected: "callable value".to_string(),
                                    found: other.type_name().to_string(),
                                }))
                            }
                        };
                        self.enter_call(fn_index, args)?;
                    }
                    continue;
                }
                Opcode::RET => {
                    let value = self.pop()?;
                    let mut frame = self.frames.pop().ok_or(VmError::FrameUnderflow)?;
                    frame.run_finalizers();
                    self.stack.truncate(frame.stack_base);
                    match frame.return_pc {
                        None => return Ok(RunOutcome::Halted(value)),
                        Some(return_pc) => {
                            self.frames.last_mut().unwrap().pc = return_pc;
                            self.push(value);
                            continue;
                        }
                    }
                }

                Opcode::LOAD_LOCAL => {
                    let slot = operand!() as usize;
                    let v = self.frame_local(slot)?;
                    self.push(v);
                }
                Opcode::STORE_LOCAL => {
                    let slot = operand!() as usize;
                    let v = self.pop()?;
                    self.set_frame_local(slot, v)?;
                }
                Opcode::LOAD_GLOBAL => {
                    let slot = operand!() as u32;
                    let v = self
                        .globals
                        .get(slot as usize)
                        .cloned()
                        .ok_or(VmError::UnknownGlobal(slot))?;
                    self.push(v);
                }
                Opcode::STORE_GLOBAL => {
                    let slot = operand!() as u32;
                    let v = self.pop()?;
                    *self
                        .globals
                        .get_mut(slot as usize)
                        .ok_or(VmError::UnknownGlobal(slot))? = v;
                }
                Opcode::LOAD_UPVALUE | Opcode::STORE_UPVALUE => {
                    // Closures never capture upvalues in this implementation
                    // (`Expr::Lambda` lowers to a plain top-level function);
                    // reaching either opcode means the bytecode targets a
                    // capability this VM doesn't provide.
                    return Err(VmError::Internal(
                        "upvalue access with no closure capture support".to_string(),
                    ));
                }

                Opcode::LOAD_BYTE | Opcode::LOAD_WORD | Opcode::LOAD_DWORD | Opcode::LOAD_QWORD => {
                    let ptr = self.pop_pointer()?;
                    let width = load_width(opcode);
                    let raw = self.memory.load(ptr.address, width)?;
                    self.push(Value::Int(raw));
                }
                Opcode::STORE_BYTE | Opcode::STORE_WORD | Opcode::STORE_DWORD | Opcode::STORE_QWORD => {
                    let value = self.pop()?;
                    let ptr = self.pop_pointer()?;
                    let width = load_width(opcode);
                    let raw = match value {
                        Value::Int(n) => n,
                        Value::Pointer(p) => p.address as i64,
                        other => {
                            return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                                expected: "int or pointer".to_string(),
                                found: other.type_name().to_string(),
                            }))
                        }
                    };
                    self.memory.store(ptr.address, width, raw)?;
                }
                Opcode::ALLOC => {
                    let size = self.pop_int()?;
                    let ptr = self.memory.alloc(size.max(0) as usize, 8);
                    self.push(Value::Pointer(ptr));
                }
                Opcode::FREE => {
                    let ptr = self.pop_pointer()?;
                    self.memory.free(ptr)?;
                }

                Opcode::NEW_LIST => {
                    let list = Rc::new(RefCell::new(Vec::new()));
                    self.push(Value::List(list.clone()));
                    self.builders.push(Builder::List(list));
                }
                Opcode::NEW_MAP => {
                    let map = Rc::new(RefCell::new(OrderedMap::new()));
                    self.push(Value::Map(map.clone()));
                    self.builders.push(Builder::Map(map));
                }
                Opcode::NEW_INSTANCE => {
                    let idx = operand!() as usize;
                    let info = program
                        .struct_table
                        .get(idx)
                        .ok_or_else(|| VmError::Internal(format!("unknown struct index {idx}")))?;
                    let value = Value::Struct(Rc::new(StructValue {
                        type_name: Rc::from(info.name.as_str()),
                        field_names: info.field_names.iter().map(|n| Rc::from(n.as_str())).collect(),
                        fields: RefCell::new(vec![Value::Null; info.field_names.len()]),
                    }));
                    self.push(value);
                }
                Opcode::GET_FIELD => {
                    let idx = operand!() as u32;
                    let name = self.const_str(&program, idx)?;
                    let object = self.pop()?;
                    let value = get_field(&program, &object, &name)?;
                    self.push(value);
                }
                Opcode::SET_FIELD => {
                    let idx = operand!() as u32;
                    let name = self.const_str(&program, idx)?;
                    let value = self.pop()?;
                    let object = self.pop()?;
                    set_field(&program, &object, &name, value)?;
                }
                Opcode::GET_INDEX => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let value = get_index(&object, &index)?;
                    self.push(value);
                }
                Opcode::SET_INDEX => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let object = self.pop()?;
                    set_index(&object, &index, value)?;
                }
                Opcode::CLOSURE => {
                    let fn_index = operand!() as u32;
                    let info = self.function_info(fn_index)?;
                    self.push(Value::Function(Rc::new(FunctionRef {
                        program_id: 0,
                        fn_index,
                        name: Rc::from(info.name.as_str()),
                    })));
                }

                Opcode::ITER_NEW => {
                    let iterable = self.pop()?;
                    let items = iterable_items(&iterable)?;
                    self.push(Value::Iterator(Rc::new(RefCell::new(IterState { items, pos: 0 }))));
                }
                Opcode::ITER_DONE => {
                    let iter = self.pop_iter()?;
                    let done = {
                        let state = iter.borrow();
                        state.pos >= state.items.len()
                    };
                    self.push(Value::Bool(done));
                }
                Opcode::ITER_NEXT => {
                    let iter = self.pop_iter()?;
                    let value = {
                        let mut state = iter.borrow_mut();
                        let pos = state.pos;
                        let item = state.items.get(pos).cloned().ok_or(VmError::Runtime(
                            RuntimeErrorKind::IndexOutOfRange { index: pos as i64, length: state.items.len() },
                        ))?;
                        state.pos += 1;
                        item
                    };
                    self.push(value);
                }

                Opcode::NEW_ACC => {
                    let tag = operand!();
                    self.builders.push(Builder::Acc { kind: AccKind::from_tag(tag)?, count: 0, state: None });
                }
                Opcode::PUSH_ACC => {
                    let is_map = matches!(self.builders.last(), Some(Builder::Map(_)));
                    if is_map {
                        let value = self.pop()?;
                        let key = self.pop()?;
                        let builder = self
                            .builders
                            .last_mut()
                            .ok_or_else(|| VmError::Internal("PUSH_ACC with no active builder".to_string()))?;
                        builder.push(Some(key), value)?;
                    } else {
                        let value = self.pop()?;
                        let builder = self
                            .builders
                            .last_mut()
                            .ok_or_else(|| VmError::Internal("PUSH_ACC with no active builder".to_string()))?;
                        builder.push(None, value)?;
                    }
                }
                Opcode::POP_ACC => {
                    let builder = self
                        .builders
                        .pop()
                        .ok_or_else(|| VmError::Internal("POP_ACC with no active builder".to_string()))?;
                    let value = builder.finalize()?;
                    self.push(value);
                }
                Opcode::END_COLLECTION => {
                    match self.builders.pop() {
                        Some(Builder::List(_)) | Some(Builder::Map(_)) => {}
                        Some(Builder::Acc { .. }) => {
                            return Err(VmError::Internal("END_COLLECTION on an accumulator builder".to_string()))
                        }
                        None => return Err(VmError::Internal("END_COLLECTION with no active builder".to_string())),
                    }
                }

                Opcode::THROW => {
                    let exc = self.pop()?;
                    match self.dispatch_throw(&program, fn_index, insn_start, exc)? {
                        Some(threw) => return Ok(RunOutcome::Threw(threw)),
                        None => continue,
                    }
                }
                Opcode::BEGIN_TRY => {
                    let _handler_offset = operand!();
                }
                Opcode::END_TRY => {}
                Opcode::LEAVE => {}

                Opcode::AWAIT => {
                    self.frames.last_mut().unwrap().pc = cursor;
                    return Ok(RunOutcome::Suspended(Suspend::Await));
                }
                Opcode::YIELD => {
                    let value = self.pop()?;
                    self.frames.last_mut().unwrap().pc = cursor;
                    self.push(Value::Null);
                    return Ok(RunOutcome::Suspended(Suspend::Yield(value)));
                }

                Opcode::PRINT => {
                    let value = self.pop()?;
                    writeln!(self.output, "{value}").map_err(|e| VmError::Internal(e.to_string()))?;
                }
                Opcode::STORE_REG => {
                    let idx = operand!() as usize;
                    let value = self.pop()?;
                    let slot = self
                        .registers
                        .get_mut(idx)
                        .ok_or_else(|| VmError::Internal(format!("register index out of range: {idx}")))?;
                    *slot = value;
                }
                Opcode::LOAD_REG => {
                    let idx = operand!() as usize;
                    let value = self
                        .registers
                        .get(idx)
                        .ok_or_else(|| VmError::Internal(format!("register index out of range: {idx}")))?
                        .clone();
                    self.push(value);
                }
                Opcode::NOP => {}
                Opcode::HALT => return Ok(RunOutcome::Halted(Value::Null)),
                Opcode::INT | Opcode::SYSCALL => {
                    let _ = operand!();
                }
            }

            self.frames.last_mut().unwrap().pc = cursor;
        }
    }

    fn enter_call(&mut self, fn_index: u32, args: Vec<Value>) -> Result<(), VmError> {
        let info = self.function_info(fn_index)?;
        let mut locals = vec![Value::Null; info.local_count as usize];
        for (i, a) in args.into_iter().enumerate() {
            if let Some(slot) = locals.get_mut(i) {
                *slot = a;
            }
        }
        let return_pc = self.frames.last().map(|f| f.pc);
        let stack_base = self.stack.len();
        self.frames.push(Frame::new(fn_index, info.entry_offset, return_pc, locals, stack_base));
        Ok(())
    }

    fn dispatch_throw(
        &mut self,
        program: &CompiledProgram,
        mut fn_index: u32,
        mut search_pc: u32,
        exc: Value,
    ) -> Result<Option<Value>, VmError> {
        loop {
            if let Some(handler) = find_handler(program, fn_index, search_pc, &exc) {
                self.frames.last_mut().unwrap().pc = handler.handler_offset;
                self.push(exc);
                return Ok(None);
            }
            let mut frame = self.frames.pop().ok_or(VmError::FrameUnderflow)?;
            frame.run_finalizers();
            self.stack.truncate(frame.stack_base);
            if self.frames.is_empty() {
                return Ok(Some(exc));
            }
            fn_index = self.frames.last().unwrap().fn_index;
            search_pc = frame.return_pc.unwrap_or(search_pc);
        }
    }

    fn function_info(&self, fn_index: u32) -> Result<&ouro_core::program::FunctionInfo, VmError> {
        self.program
            .function_table
            .get(fn_index as usize)
            .ok_or(VmError::UnknownFunction(fn_index))
    }

    fn constant_value(&self, program: &CompiledProgram, idx: u32) -> Result<Value, VmError> {
        program
            .constant_pool
            .get(idx as usize)
            .map(Constant::to_value)
            .ok_or(VmError::UnknownConstant(idx))
    }

    fn const_str(&self, program: &CompiledProgram, idx: u32) -> Result<Rc<str>, VmError> {
        match program.constant_pool.get(idx as usize) {
            Some(Constant::Str(s)) => Ok(Rc::from(s.as_str())),
            _ => Err(VmError::UnknownConstant(idx)),
        }
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn top(&self) -> Result<&Value, VmError> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }

    fn pop_pair(&mut self) -> Result<(Value, Value), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                expected: "int".to_string(),
                found: other.type_name().to_string(),
            })),
        }
    }

    fn pop_int_pair(&mut self) -> Result<(i64, i64), VmError> {
        let b = self.pop_int()?;
        let a_val = self.pop()?;
        let a = match a_val {
            Value::Int(n) => n,
            other => {
                return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                    expected: "int".to_string(),
                    found: other.type_name().to_string(),
                }))
            }
        };
        Ok((a, b))
    }

    fn pop_pointer(&mut self) -> Result<TypedPointer, VmError> {
        match self.pop()? {
            Value::Pointer(p) => Ok(p),
            other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                expected: "pointer".to_string(),
                found: other.type_name().to_string(),
            })),
        }
    }

    fn pop_iter(&mut self) -> Result<Rc<RefCell<IterState>>, VmError> {
        match self.pop()? {
            Value::Iterator(it) => Ok(it),
            other => Err(VmError::Internal(format!("expected iterator, found {}", other.type_name()))),
        }
    }

    fn frame_local(&self, slot: usize) -> Result<Value, VmError> {
        self.frames
            .last()
            .and_then(|f| f.locals.get(slot))
            .cloned()
            .ok_or_else(|| VmError::Internal(format!("unknown local slot {slot}")))
    }

    fn set_frame_local(&mut self, slot: usize, value: Value) -> Result<(), VmError> {
        let frame = self.frames.last_mut().ok_or(VmError::FrameUnderflow)?;
        if slot >= frame.locals.len() {
            frame.locals.resize(slot + 1, Value::Null);
        }
        frame.locals[slot] = value;
        Ok(())
    }

    fn binary_arith(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (a, b) = self.pop_pair()?;
        let result = match opcode {
            Opcode::ADD => ouro_core::value::arith::binary(ouro_core::value::arith::ArithOp::Add, &a, &b)?,
            Opcode::SUB => ouro_core::value::arith::binary(ouro_core::value::arith::ArithOp::Sub, &a, &b)?,
            Opcode::MUL => ouro_core::value::arith::binary(ouro_core::value::arith::ArithOp::Mul, &a, &b)?,
            Opcode::DIV => ouro_core::value::arith::binary(ouro_core::value::arith::ArithOp::Div, &a, &b)?,
            Opcode::MOD => ouro_core::value::arith::binary(ouro_core::value::arith::ArithOp::Mod, &a, &b)?,
            Opcode::POW => pow_value(&a, &b)?,
            _ => unreachable!("binary_arith called with a non-arithmetic opcode"),
        };
        self.push(result);
        Ok(())
    }

    fn bitwise(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (a, b) = self.pop_int_pair()?;
        let result = match opcode {
            Opcode::AND => a & b,
            Opcode::OR => a | b,
            Opcode::XOR => a ^ b,
            Opcode::SHL => a.wrapping_shl(b as u32 & 63),
            Opcode::SHR => ((a as u64).wrapping_shr(b as u32 & 63)) as i64,
            Opcode::ROL => a.rotate_left((b & 63) as u32),
            Opcode::ROR => a.rotate_right((b & 63) as u32),
            _ => unreachable!("bitwise called with a non-bitwise opcode"),
        };
        self.push(Value::Int(result));
        Ok(())
    }

    fn ordering_compare(&mut self, opcode: Opcode) -> Result<(), VmError> {
        let (a, b) = self.pop_pair()?;
        let ord = compare_values(&a, &b)?;
        let result = match opcode {
            Opcode::LT => ord == std::cmp::Ordering::Less,
            Opcode::GT => ord == std::cmp::Ordering::Greater,
            Opcode::LE => ord != std::cmp::Ordering::Greater,
            Opcode::GE => ord != std::cmp::Ordering::Less,
            _ => unreachable!("ordering_compare called with a non-ordering opcode"),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    fn flag_condition(&self, opcode: Opcode) -> bool {
        use std::cmp::Ordering::*;
        let ord = self.last_cmp;
        match opcode {
            Opcode::JE => ord == Some(Equal),
            Opcode::JNE => ord != Some(Equal),
            Opcode::JL | Opcode::JB => ord == Some(Less),
            Opcode::JG | Opcode::JA => ord == Some(Greater),
            Opcode::JAE => ord != Some(Less),
            Opcode::JBE => ord != Some(Greater),
            // Overflow/sign flags are never produced by CMP/TEST in this
            // design (no arithmetic-flags model); neither mnemonic is ever
            // emitted by the assembler, so these branches are unreachable
            // in practice and only exist to keep the opcode table total.
            Opcode::JO => false,
            Opcode::JNO => true,
            Opcode::JS => ord == Some(Less),
            Opcode::JNS => ord != Some(Less),
            _ => false,
        }
    }
}

fn pow_value(a: &Value, b: &Value) -> Result<Value, VmError> {
    match (a, b) {
        (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
            Ok(Value::Int(base.wrapping_pow(*exp as u32)))
        }
        (Value::Int(base), Value::Int(exp)) => Ok(Value::Float((*base as f64).powi(*exp as i32))),
        (Value::Float(base), Value::Int(exp)) => Ok(Value::Float(base.powi(*exp as i32))),
        (Value::Int(base), Value::Float(exp)) => Ok(Value::Float((*base as f64).powf(*exp))),
        (Value::Float(base), Value::Float(exp)) => Ok(Value::Float(base.powf(*exp))),
        (other_a, other_b) => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "numeric operands".to_string(),
            found: format!("{}, {}", other_a.type_name(), other_b.type_name()),
        })),
    }
}

fn compare_values(a: &Value, b: &Value) -> Result<std::cmp::Ordering, VmError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => {
            x.partial_cmp(y).ok_or(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                expected: "comparable float".to_string(),
                found: "NaN".to_string(),
            }))
        }
        (Value::Int(x), Value::Float(y)) => (*x as f64)
            .partial_cmp(y)
            .ok_or_else(|| VmError::Runtime(RuntimeErrorKind::TypeMismatch { expected: "comparable".into(), found: "NaN".into() })),
        (Value::Float(x), Value::Int(y)) => x
            .partial_cmp(&(*y as f64))
            .ok_or_else(|| VmError::Runtime(RuntimeErrorKind::TypeMismatch { expected: "comparable".into(), found: "NaN".into() })),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (other_a, other_b) => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "comparable operands".to_string(),
            found: format!("{}, {}", other_a.type_name(), other_b.type_name()),
        })),
    }
}

fn get_field(program: &CompiledProgram, object: &Value, name: &str) -> Result<Value, VmError> {
    match object {
        Value::Struct(s) => {
            let idx = field_index(s.field_names.iter().map(|n| n.as_ref()), name)?;
            Ok(s.fields.borrow()[idx].clone())
        }
        Value::Instance(i) => {
            let class = program
                .class_table
                .get(i.class_id as usize)
                .ok_or_else(|| VmError::Internal(format!("unknown class index {}", i.class_id)))?;
            let idx = field_index(class.field_names.iter().map(String::as_str), name)?;
            Ok(i.fields.borrow()[idx].clone())
        }
        Value::Null => Err(VmError::Runtime(RuntimeErrorKind::NullReference)),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "struct or instance".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn set_field(program: &CompiledProgram, object: &Value, name: &str, value: Value) -> Result<(), VmError> {
    match object {
        Value::Struct(s) => {
            let idx = field_index(s.field_names.iter().map(|n| n.as_ref()), name)?;
            s.fields.borrow_mut()[idx] = value;
            Ok(())
        }
        Value::Instance(i) => {
            let class = program
                .class_table
                .get(i.class_id as usize)
                .ok_or_else(|| VmError::Internal(format!("unknown class index {}", i.class_id)))?;
            let idx = field_index(class.field_names.iter().map(String::as_str), name)?;
            i.fields.borrow_mut()[idx] = value;
            Ok(())
        }
        Value::Null => Err(VmError::Runtime(RuntimeErrorKind::NullReference)),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "struct or instance".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn field_index<'a>(mut names: impl Iterator<Item = &'a str>, name: &str) -> Result<usize, VmError> {
    names
        .position(|f| f == name)
        .ok_or_else(|| VmError::Runtime(RuntimeErrorKind::Unhandled(format!("no field '{name}'"))))
}

fn get_index(object: &Value, index: &Value) -> Result<Value, VmError> {
    match object {
        Value::List(l) => {
            let l = l.borrow();
            let i = index_as_usize(index, l.len())?;
            Ok(l[i].clone())
        }
        Value::Map(m) => {
            let key = ouro_core::value::MapKey::from_value(index).ok_or_else(|| {
                VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                    expected: "int, string or bool key".to_string(),
                    found: index.type_name().to_string(),
                })
            })?;
            m.borrow().get(&key).cloned().ok_or(VmError::Runtime(RuntimeErrorKind::NullReference))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = index_as_usize(index, chars.len())?;
            Ok(Value::Str(Rc::from(chars[i].to_string())))
        }
        Value::Null => Err(VmError::Runtime(RuntimeErrorKind::NullReference)),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "list, map or string".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn set_index(object: &Value, index: &Value, value: Value) -> Result<(), VmError> {
    match object {
        Value::List(l) => {
            let mut l = l.borrow_mut();
            let i = index_as_usize(index, l.len())?;
            l[i] = value;
            Ok(())
        }
        Value::Map(m) => {
            let key = ouro_core::value::MapKey::from_value(index).ok_or_else(|| {
                VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                    expected: "int, string or bool key".to_string(),
                    found: index.type_name().to_string(),
                })
            })?;
            m.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::Null => Err(VmError::Runtime(RuntimeErrorKind::NullReference)),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "list or map".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn index_as_usize(index: &Value, len: usize) -> Result<usize, VmError> {
    let i = match index {
        Value::Int(n) => *n,
        other => {
            return Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                expected: "int index".to_string(),
                found: other.type_name().to_string(),
            }))
        }
    };
    if i < 0 || i as usize >= len {
        return Err(VmError::Runtime(RuntimeErrorKind::IndexOutOfRange { index: i, length: len }));
    }
    Ok(i as usize)
}

fn iterable_items(value: &Value) -> Result<Vec<Value>, VmError> {
    match value {
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Map(m) => Ok(m.borrow().keys().map(|k| k.clone().into_value()).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(Rc::from(c.to_string()))).collect()),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "list, map or string".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn load_width(opcode: Opcode) -> usize {
    match opcode {
        Opcode::LOAD_BYTE | Opcode::STORE_BYTE => 1,
        Opcode::LOAD_WORD | Opcode::STORE_WORD => 2,
        Opcode::LOAD_DWORD | Opcode::STORE_DWORD => 4,
        Opcode::LOAD_QWORD | Opcode::STORE_QWORD => 8,
        _ => unreachable!("load_width called with a non-memory opcode"),
    }
}

fn find_handler<'a>(
    program: &'a CompiledProgram,
    fn_index: u32,
    pc: u32,
    exc: &Value,
) -> Option<&'a HandlerEntry> {
    program.exception_handler_table.iter().find(|h| {
        h.fn_index == fn_index
            && pc >= h.try_start
            && pc < h.try_end
            && exception_matches(program, h, exc)
    })
}

/// A handler matches if its declared type names the thrown value's own
/// type, or any ancestor in its declared class hierarchy (spec section
/// 6/9: "a handler with a type matches that type or any subtype"). Only
/// `Instance` values carry a class hierarchy to walk; every other value
/// kind falls back to an exact type-name match.
fn exception_matches(program: &CompiledProgram, handler: &HandlerEntry, exc: &Value) -> bool {
    match handler.exception_type_index {
        None => true,
        Some(idx) => match program.constant_pool.get(idx as usize) {
            Some(Constant::Str(name)) => exception_type_chain(program, exc).iter().any(|t| t == name),
            _ => false,
        },
    }
}

/// The thrown value's own type name followed by each ancestor class name,
/// walking `ClassInfo::parent` up to the root.
fn exception_type_chain(program: &CompiledProgram, value: &Value) -> Vec<&str> {
    match value {
        Value::Instance(i) => {
            let mut chain = vec![i.class_name.as_ref()];
            let mut class = program.class_table.get(i.class_id as usize);
            while let Some(c) = class {
                match c.parent {
                    Some(parent_idx) => {
                        let parent = program.class_table.get(parent_idx as usize);
                        if let Some(parent) = parent {
                            chain.push(parent.name.as_str());
                        }
                        class = parent;
                    }
                    None => break,
                }
            }
            chain
        }
        Value::Struct(s) => vec![&s.type_name],
        other => vec![other.type_name()],
    }
}

fn read_opcode(bytecode: &[u8], cursor: &mut u32) -> Result<Opcode, VmError> {
    let pos = *cursor as usize;
    let bytes = bytecode.get(pos..pos + 2).ok_or(VmError::Truncated(*cursor))?;
    let code = u16::from_le_bytes([bytes[0], bytes[1]]);
    *cursor += 2;
    Opcode::from_u16(code).ok_or(VmError::UnknownOpcode(code))
}

fn read_operand(bytecode: &[u8], cursor: &mut u32) -> Result<i64, VmError> {
    let tag_pos = *cursor as usize;
    let tag = *bytecode.get(tag_pos).ok_or(VmError::Truncated(*cursor))?;
    *cursor += 1;
    let width = tag as usize;
    let pos = *cursor as usize;
    let bytes = bytecode.get(pos..pos + width).ok_or(VmError::Truncated(*cursor))?;
    *cursor += width as u32;
    Ok(match width {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_le_bytes(bytes.try_into().unwrap()),
        other => return Err(VmError::Internal(format!("invalid immediate width tag {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_compiler::compile;

    fn run_program(src: &str) -> RunOutcome {
        let program = compile(src, "test.ouro").unwrap();
        let mut vm = Vm::new(Rc::new(program));
        vm.run().unwrap()
    }

    #[test]
    fn runs_simple_arithmetic_to_halt() {
        let outcome = run_program("let x = 1 + 2;");
        assert!(matches!(outcome, RunOutcome::Halted(Value::Null)));
    }

    #[test]
    fn function_call_returns_value() {
        let outcome = run_program("fn add(a, b) { return a + b; } return add(3, 4);");
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(7))));
    }

    #[test]
    fn if_else_branches_correctly() {
        let outcome = run_program("let x = 0; if 1 > 0 { x = 10; } else { x = 20; } return x;");
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(10))));
    }

    #[test]
    fn while_loop_accumulates() {
        let outcome = run_program(
            "let i = 0; let sum = 0; while i < 5 { sum = sum + i; i = i + 1; } return sum;",
        );
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(10))));
    }

    #[test]
    fn list_literal_builds_correctly() {
        let outcome = run_program("let xs = [1, 2, 3]; return xs[1];");
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(2))));
    }

    #[test]
    fn try_catch_recovers_from_throw() {
        let outcome = run_program(
            "let result = 0; try { throw 99; } catch (e) { result = e; } return result;",
        );
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(99))));
    }

    #[test]
    fn unhandled_throw_propagates_to_top() {
        let outcome = run_program("throw 7;");
        assert!(matches!(outcome, RunOutcome::Threw(Value::Int(7))));
    }

    #[test]
    fn sum_of_all_aggregate_computes_total() {
        let outcome = run_program("let xs = [1, 2, 3]; return sum of all x in xs { x };");
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(6))));
    }

    #[test]
    fn integer_arithmetic_wraps_on_overflow() {
        let mut vm_src = String::new();
        vm_src.push_str("return 9223372036854775807 + 1;");
        let outcome = run_program(&vm_src);
        assert!(matches!(outcome, RunOutcome::Halted(Value::Int(i64::MIN))));
    }

    #[test]
    fn await_suspends_and_resumes_with_same_value() {
        let program = compile("let x = await 5; return x;", "test.ouro").unwrap();
        let mut vm = Vm::new(Rc::new(program));
        let first = vm.run().unwrap();
        assert!(matches!(first, RunOutcome::Suspended(Suspend::Await)));
        let second = vm.run().unwrap();
        assert!(matches!(second, RunOutcome::Halted(Value::Int(5))));
    }

    struct SharedBuf(Rc<RefCell<Vec<u8>>>);
    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn print_writes_display_form_and_newline() {
        let program = compile("print \"hello\";", "test.ouro").unwrap();
        let buf = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::with_output(Rc::new(program), Box::new(SharedBuf(buf.clone())));
        vm.run().unwrap();
        assert_eq!(*buf.borrow(), b"hello\n");
    }

    #[test]
    fn cancellation_raises_cancelled_error() {
        let program = compile("let x = await 5; return x;", "test.ouro").unwrap();
        let mut vm = Vm::new(Rc::new(program));
        let first = vm.run().unwrap();
        assert!(matches!(first, RunOutcome::Suspended(Suspend::Await)));
        vm.cancel();
        let err = vm.run().unwrap_err();
        assert_eq!(err, VmError::Runtime(RuntimeErrorKind::Cancelled));
    }
}
