//! The compiled-program data model (spec section 3, "Compiled Program").
//!
//! `CompiledProgram` is produced by `ouro-compiler`'s emitter and consumed
//! read-only by any number of `ouro-vm` invocations; it lives in this crate
//! (rather than in the compiler) so the VM crate does not need to depend on
//! the compiler crate to execute one.

use std::collections::HashMap;

use crate::value::Value;

/// One entry in a function table: everything the VM needs to set up a call
/// frame and run a function's body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub entry_offset: u32,
    pub parameter_count: u16,
    pub local_count: u16,
    /// Maps an upvalue slot to either a parent-frame local slot or a parent
    /// upvalue slot, mirroring how closures capture their environment.
    pub upvalue_map: Vec<UpvalueSource>,
    pub is_async: bool,
    /// For async functions: bytecode offsets of each resumption point,
    /// indexed by the state machine's hidden state-index local (spec
    /// section 4.4, "Async/await").
    pub suspend_points: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpvalueSource {
    ParentLocal(u16),
    ParentUpvalue(u16),
}

/// One exception-handler-table entry (spec section 3, "Handler entries").
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct HandlerEntry {
    pub try_start: u32,
    pub try_end: u32,
    pub handler_offset: u32,
    /// Constant-pool index of the declared exception type name, or `None`
    /// for a handler with no declared type (matches any exception).
    pub exception_type_index: Option<u32>,
    /// The function this entry belongs to, so the VM can scan only the
    /// active frame's entries during unwinding.
    pub fn_index: u32,
}

/// A serializable constant: the subset of `Value` that can appear in the
/// constant pool (heap handles are reconstructed fresh on load, so the
/// pool stores plain data, not live `Rc` handles).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    UnitNumber(f64, String),
    Str(String),
    Bytes(Vec<u8>),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::UnitNumber(n, unit) => {
                Value::UnitNumber(*n, crate::value::Unit::new(unit.as_str()))
            }
            Constant::Str(s) => Value::Str(std::rc::Rc::from(s.as_str())),
            Constant::Bytes(b) => Value::Bytes(std::rc::Rc::new(std::cell::RefCell::new(b.clone()))),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub field_names: Vec<String>,
    pub parent: Option<u32>,
    pub methods: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StructInfo {
    pub name: String,
    pub field_names: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EnumInfo {
    pub name: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub method_names: Vec<String>,
}

/// Where an exported name's value lives once `<module>` (function 0) has
/// run (spec section 3, "Module" `exports: Map<Name, Symbol>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExportBinding {
    /// A `var`/`const` export: read the module's global slot after running.
    Global(u32),
    /// A `fn` export: a callable function-table index, no global involved.
    Function(u32),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgramMetadata {
    pub compile_timestamp_ms: u64,
    pub optimization_level: u8,
    pub target_platform: String,
    pub debug: bool,
}

/// `{bytecode, constant_pool, function_table, class_table, struct_table,
/// enum_table, interface_table, exception_handler_table, symbol_table,
/// source_file, metadata}` (spec section 3).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CompiledProgram {
    pub bytecode: Vec<u8>,
    pub constant_pool: Vec<Constant>,
    pub function_table: Vec<FunctionInfo>,
    pub class_table: Vec<ClassInfo>,
    pub struct_table: Vec<StructInfo>,
    pub enum_table: Vec<EnumInfo>,
    pub interface_table: Vec<InterfaceInfo>,
    pub exception_handler_table: Vec<HandlerEntry>,
    /// name -> function-table index, for globals resolved by name.
    pub symbol_table: HashMap<String, u32>,
    /// Number of global variable slots the emitter assigned; the VM
    /// pre-sizes its global vector to this before running function 0.
    pub global_count: u32,
    /// `export`-declared top-level bindings (spec section 3/4.5), surfaced
    /// by the loader as a module's exports map after running `<module>`.
    pub exports: HashMap<String, ExportBinding>,
    pub source_file: String,
    pub metadata: ProgramMetadata,
}

impl CompiledProgram {
    /// Validate the invariants from spec section 3:
    /// - every constant-pool index referenced is in range (checked lazily
    ///   by callers when decoding `PUSH` operands; this method re-verifies
    ///   the tables that can be checked structurally up front),
    /// - every jump offset lands inside the same function,
    /// - every handler's `try_start < try_end` and `handler_offset` lies
    ///   inside its enclosing function.
    pub fn verify(&self) -> Result<(), String> {
        for (i, f) in self.function_table.iter().enumerate() {
            if f.entry_offset as usize > self.bytecode.len() {
                return Err(format!("function {i} entry offset out of range"));
            }
        }
        for h in &self.exception_handler_table {
            if h.try_start >= h.try_end {
                return Err(format!(
                    "handler try_start {} >= try_end {}",
                    h.try_start, h.try_end
                ));
            }
            let f = self
                .function_table
                .get(h.fn_index as usize)
                .ok_or_else(|| format!("handler references unknown function {}", h.fn_index))?;
            let (start, end) = function_bounds(&self.function_table, h.fn_index, self.bytecode.len());
            if h.handler_offset < start || h.handler_offset >= end {
                return Err(format!(
                    "handler_offset {} outside function {} bounds [{start}, {end})",
                    h.handler_offset, f.name
                ));
            }
        }
        Ok(())
    }
}

/// The `[start, end)` byte range owned by function `idx`, derived from the
/// sorted entry offsets (the last function's region runs to end-of-stream).
pub fn function_bounds(table: &[FunctionInfo], idx: u32, bytecode_len: usize) -> (u32, u32) {
    let start = table[idx as usize].entry_offset;
    let end = table
        .iter()
        .map(|f| f.entry_offset)
        .filter(|&o| o > start)
        .min()
        .unwrap_or(bytecode_len as u32);
    (start, end)
}
