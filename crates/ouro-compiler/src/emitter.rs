//! Bytecode emitter (spec section 4.4).
//!
//! Walks the AST once per function, emitting stack-machine bytecode into a
//! single shared byte buffer; every function's body is a contiguous `[start,
//! end)` range inside that buffer, recorded as `FunctionInfo::entry_offset`
//! (end is implicit: the next function's start, or the buffer's end for the
//! last one — see `ouro_core::program::function_bounds`).
//!
//! Immediates use the narrowest-fit width (`ImmWidth::narrowest_for`)
//! everywhere except jump/branch targets, which are always emitted as a
//! fixed 4-byte relative offset: a jump's target offset isn't known until
//! the rest of the function has been emitted, so its width can't be chosen
//! narrow ahead of time without a label pre-pass like the assembler's.

use std::collections::HashMap;

use ouro_core::opcode::{ImmWidth, Opcode};
use ouro_core::program::{
    ClassInfo, CompiledProgram, Constant, EnumInfo, ExportBinding, FunctionInfo, HandlerEntry,
    InterfaceInfo, ProgramMetadata, StructInfo, UpvalueSource,
};

use crate::asm::{AsmError, Assembler};
use crate::ast::*;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("undefined name '{0}'")]
    UndefinedName(String),
    #[error("'{0}' cannot appear outside a loop")]
    InvalidBreakContinue(String),
    #[error("assembler error: {0}")]
    Asm(String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("duplicate export '{0}'")]
    DuplicateExport(String),
}

impl From<AsmError> for CompileError {
    fn from(e: AsmError) -> Self {
        CompileError::Asm(e.to_string())
    }
}

struct Scope {
    locals: HashMap<String, u16>,
    next_slot: u16,
}

struct LoopContext {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct FnCtx {
    code: Vec<u8>,
    scopes: Vec<Scope>,
    loops: Vec<LoopContext>,
    is_async: bool,
    suspend_points: Vec<u32>,
    handlers: Vec<HandlerEntry>,
    /// True only for the implicit `<module>` function's context: a `let`
    /// here binds a module-scope global (spec section 4.5, "Module model")
    /// rather than a frame-local, so the value survives past `<module>`
    /// returning and can be published as an export.
    top_level: bool,
}

impl FnCtx {
    fn new(is_async: bool) -> Self {
        FnCtx {
            code: Vec::new(),
            scopes: vec![Scope { locals: HashMap::new(), next_slot: 0 }],
            loops: Vec::new(),
            is_async,
            suspend_points: Vec::new(),
            handlers: Vec::new(),
            top_level: false,
        }
    }

    fn declare_local(&mut self, name: &str) -> u16 {
        let scope = self.scopes.last_mut().unwrap();
        let slot = scope.next_slot;
        scope.next_slot += 1;
        scope.locals.insert(name.to_string(), slot);
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        for scope in self.scopes.iter().rev() {
            if let Some(&slot) = scope.locals.get(name) {
                return Some(slot);
            }
        }
        None
    }

    fn local_count(&self) -> u16 {
        self.scopes.iter().map(|s| s.next_slot).max().unwrap_or(0)
    }

    fn push_scope(&mut self) {
        let next = self.scopes.last().map(|s| s.next_slot).unwrap_or(0);
        self.scopes.push(Scope { locals: HashMap::new(), next_slot: next });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }
}

pub struct Emitter {
    bytecode: Vec<u8>,
    constant_pool: Vec<Constant>,
    constant_index: HashMap<ConstKey, u32>,
    function_table: Vec<FunctionInfo>,
    function_index: HashMap<String, u32>,
    class_table: Vec<ClassInfo>,
    struct_table: Vec<StructInfo>,
    enum_table: Vec<EnumInfo>,
    interface_table: Vec<InterfaceInfo>,
    handler_table: Vec<HandlerEntry>,
    symbol_table: HashMap<String, u32>,
    globals: HashMap<String, u32>,
    next_global_slot: u32,
    exports: HashMap<String, ExportBinding>,
    pending_functions: Vec<(u32, FunctionDecl)>,
    /// Declared parent class name for each `class_table` entry, in the
    /// same order as the table itself; resolved into `ClassInfo::parent`
    /// indices once every class in the module has been collected, so a
    /// class may extend one declared later in the same file.
    class_parents: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
enum ConstKey {
    Int(i64),
    Str(String),
}

impl Emitter {
    pub fn new() -> Self {
        Emitter {
            bytecode: Vec::new(),
            constant_pool: Vec::new(),
            constant_index: HashMap::new(),
            function_table: Vec::new(),
            function_index: HashMap::new(),
            class_table: Vec::new(),
            struct_table: Vec::new(),
            enum_table: Vec::new(),
            interface_table: Vec::new(),
            handler_table: Vec::new(),
            symbol_table: HashMap::new(),
            globals: HashMap::new(),
            next_global_slot: 0,
            exports: HashMap::new(),
            pending_functions: Vec::new(),
            class_parents: Vec::new(),
        }
    }

    pub fn compile(
        self,
        program: &Program,
        source_file: &str,
        optimization_level: u8,
        debug: bool,
    ) -> Result<CompiledProgram, CompileError> {
        self.compile_with_imports(program, source_file, optimization_level, debug, &HashMap::new())
    }

    /// As `compile`, but first binds `imported` (name -> realized value,
    /// from the loader's module record for each of this program's `import`
    /// statements — spec section 4.5/4.6) into module scope before any of
    /// `program`'s own top-level code runs.
    pub fn compile_with_imports(
        mut self,
        program: &Program,
        source_file: &str,
        optimization_level: u8,
        debug: bool,
        imported: &HashMap<String, ouro_core::value::Value>,
    ) -> Result<CompiledProgram, CompileError> {
        // Reserve slot 0 for the implicit module init / main function.
        self.function_table.push(FunctionInfo {
            name: "<module>".to_string(),
            entry_offset: 0,
            parameter_count: 0,
            local_count: 0,
            upvalue_map: Vec::new(),
            is_async: false,
            suspend_points: Vec::new(),
        });

        self.collect_declarations(&program.items)?;
        self.resolve_class_hierarchy()?;

        let mut main_ctx = FnCtx::new(false);
        main_ctx.top_level = true;
        for (name, value) in imported {
            self.emit_import_binding(name, value, &mut main_ctx)?;
        }
        for item in &program.items {
            self.emit_item(item, &mut main_ctx)?;
        }
        main_ctx.code.extend_from_slice(&[Opcode::HALT as u16 as u8, (Opcode::HALT as u16 >> 8) as u8]);
        self.function_table[0].local_count = main_ctx.local_count();
        self.function_table[0].entry_offset = 0;
        self.function_table[0].upvalue_map = Vec::new();
        let main_len = main_ctx.code.len();
        self.bytecode = main_ctx.code;
        self.handler_table.extend(main_ctx.handlers.into_iter().map(|mut h| {
            h.fn_index = 0;
            h
        }));
        let _ = main_len;

        // Emitting a function body can itself declare new pending functions
        // (nested lambdas), so drain the queue until it's empty rather than
        // iterating a single snapshot.
        while !self.pending_functions.is_empty() {
            let batch = std::mem::take(&mut self.pending_functions);
            for (idx, decl) in batch {
                self.emit_function_body(idx, &decl)?;
            }
        }

        let constant_pool = self.constant_pool;
        let program = CompiledProgram {
            bytecode: self.bytecode,
            constant_pool,
            function_table: self.function_table,
            class_table: self.class_table,
            struct_table: self.struct_table,
            enum_table: self.enum_table,
            interface_table: self.interface_table,
            exception_handler_table: self.handler_table,
            symbol_table: self.symbol_table,
            global_count: self.next_global_slot,
            exports: self.exports,
            source_file: source_file.to_string(),
            metadata: ProgramMetadata {
                compile_timestamp_ms: 0,
                optimization_level,
                target_platform: "ouro-vm".to_string(),
                debug,
            },
        };
        program.verify().map_err(CompileError::Unsupported)?;
        Ok(program)
    }

    fn collect_declarations(&mut self, items: &[Item]) -> Result<(), CompileError> {
        for item in items {
            match item {
                Item::Function(f) => {
                    self.declare_function(f.clone())?;
                }
                Item::Class(c) => {
                    let mut methods = HashMap::new();
                    for m in &c.methods {
                        let idx = self.declare_function(m.clone())?;
                        methods.insert(m.name.clone(), idx);
                    }
                    self.class_table.push(ClassInfo {
                        name: c.name.clone(),
                        field_names: c.fields.iter().map(|f| f.name.clone()).collect(),
                        parent: None,
                        methods,
                    });
                    self.class_parents.push(c.parent.clone());
                }
                Item::Struct(s) => {
                    self.struct_table.push(StructInfo {
                        name: s.name.clone(),
                        field_names: s.fields.iter().map(|f| f.name.clone()).collect(),
                    });
                }
                Item::Enum(e) => {
                    self.enum_table.push(EnumInfo {
                        name: e.name.clone(),
                        variants: e.variants.clone(),
                    });
                }
                Item::Interface(i) => {
                    self.interface_table.push(InterfaceInfo {
                        name: i.name.clone(),
                        method_names: i.method_names.clone(),
                    });
                }
                Item::Namespace { items, .. } => self.collect_declarations(items)?,
                Item::Export { item, .. } => self.collect_export(item)?,
                Item::Import { .. } | Item::Statement(_) | Item::AsmBlock { .. } => {}
            }
        }
        Ok(())
    }

    /// Declares an `export`-wrapped item and, for the kinds that resolve
    /// through name lookup at runtime (`fn`, `let`/`const`), additionally
    /// records an `ExportBinding` so the loader can publish it into a
    /// module's record (spec section 3, `exports: Map<Name, Symbol>`).
    /// Class/struct/enum/interface exports still declare normally — they
    /// are referenced by type name at the use site rather than through
    /// identifier resolution, so there is no binding to record for them
    /// yet (see DESIGN.md).
    fn collect_export(&mut self, item: &Item) -> Result<(), CompileError> {
        match item {
            Item::Function(f) => {
                let idx = self.declare_function(f.clone())?;
                if self.exports.insert(f.name.clone(), ExportBinding::Function(idx)).is_some() {
                    return Err(CompileError::DuplicateExport(f.name.clone()));
                }
                Ok(())
            }
            Item::Statement(Stmt::Let { name, .. }) => {
                let slot = self.global_slot(name);
                if self.exports.insert(name.clone(), ExportBinding::Global(slot)).is_some() {
                    return Err(CompileError::DuplicateExport(name.clone()));
                }
                Ok(())
            }
            other => self.collect_declarations(std::slice::from_ref(other)),
        }
    }

    /// Wires each class's declared `extends` name (spec section 6/9,
    /// "declared class hierarchy") to its parent's `class_table` index,
    /// now that every class in the module has been collected — a class
    /// may extend one declared later in the same file.
    fn resolve_class_hierarchy(&mut self) -> Result<(), CompileError> {
        let by_name: HashMap<String, u32> = self
            .class_table
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i as u32))
            .collect();
        for (idx, parent_name) in self.class_parents.iter().enumerate() {
            if let Some(parent_name) = parent_name {
                let parent_idx = by_name
                    .get(parent_name)
                    .copied()
                    .ok_or_else(|| CompileError::UndefinedName(parent_name.clone()))?;
                self.class_table[idx].parent = Some(parent_idx);
            }
        }
        Ok(())
    }

    fn declare_function(&mut self, decl: FunctionDecl) -> Result<u32, CompileError> {
        let idx = self.function_table.len() as u32;
        self.function_table.push(FunctionInfo {
            name: decl.name.clone(),
            entry_offset: 0,
            parameter_count: decl.params.len() as u16,
            local_count: 0,
            upvalue_map: Vec::new(),
            is_async: decl.is_async,
            suspend_points: Vec::new(),
        });
        self.function_index.insert(decl.name.clone(), idx);
        self.symbol_table.insert(decl.name.clone(), idx);
        self.pending_functions.push((idx, decl));
        Ok(idx)
    }

    fn emit_function_body(&mut self, idx: u32, decl: &FunctionDecl) -> Result<(), CompileError> {
        let mut ctx = FnCtx::new(decl.is_async);
        for p in &decl.params {
            ctx.declare_local(&p.name);
        }
        for stmt in &decl.body {
            self.emit_stmt(stmt, &mut ctx)?;
        }
        // Implicit `return null;` if control falls off the end.
        push_opcode(&mut ctx.code, Opcode::PUSH);
        let null_idx = self.intern_null();
        push_immediate(&mut ctx.code, null_idx);
        push_opcode(&mut ctx.code, Opcode::RET);

        let entry_offset = self.bytecode.len() as u32;
        self.bytecode.extend_from_slice(&ctx.code);
        self.function_table[idx as usize].entry_offset = entry_offset;
        self.function_table[idx as usize].local_count = ctx.local_count();
        self.function_table[idx as usize].suspend_points =
            ctx.suspend_points.iter().map(|p| p + entry_offset).collect();
        // Handler ranges were recorded relative to this function's own code
        // buffer (starting at 0); rebase them onto the shared bytecode
        // stream now that the function's absolute position is known.
        self.handler_table.extend(ctx.handlers.into_iter().map(|h| HandlerEntry {
            try_start: h.try_start + entry_offset,
            try_end: h.try_end + entry_offset,
            handler_offset: h.handler_offset + entry_offset,
            exception_type_index: h.exception_type_index,
            fn_index: idx,
        }));
        Ok(())
    }

    fn intern_null(&mut self) -> i64 {
        self.intern_const(Constant::Null)
    }

    fn intern_const(&mut self, c: Constant) -> i64 {
        let key = match &c {
            Constant::Int(n) => Some(ConstKey::Int(*n)),
            Constant::Str(s) => Some(ConstKey::Str(s.clone())),
            _ => None,
        };
        if let Some(k) = &key {
            if let Some(&idx) = self.constant_index.get(k) {
                return idx as i64;
            }
        }
        let idx = self.constant_pool.len() as u32;
        self.constant_pool.push(c);
        if let Some(k) = key {
            self.constant_index.insert(k, idx);
        }
        idx as i64
    }

    /// Synthesizes the equivalent of `let <name> = <value>;` at module
    /// scope for one imported binding, reusing the ordinary top-level
    /// `let` codegen path (a global slot, populated before any of the
    /// importer's own code runs). Only values representable in the
    /// constant pool can cross a module boundary this way; a module that
    /// exports a list, map, struct, or function value can't currently be
    /// imported by name (spec section 4.5's cross-module linking is scoped
    /// to constant-like exports — see DESIGN.md).
    fn emit_import_binding(
        &mut self,
        name: &str,
        value: &ouro_core::value::Value,
        ctx: &mut FnCtx,
    ) -> Result<(), CompileError> {
        let constant = value_to_constant(value).ok_or_else(|| {
            CompileError::Unsupported(format!(
                "cannot import '{name}': only constant-like values (numbers, strings, bools, null) cross a module boundary"
            ))
        })?;
        let idx = self.intern_const(constant);
        push_opcode(&mut ctx.code, Opcode::PUSH);
        push_immediate(&mut ctx.code, idx);
        let slot = self.global_slot(name);
        push_opcode(&mut ctx.code, Opcode::STORE_GLOBAL);
        push_immediate(&mut ctx.code, slot as i64);
        Ok(())
    }

    fn global_slot(&mut self, name: &str) -> u32 {
        if let Some(&slot) = self.globals.get(name) {
            return slot;
        }
        let slot = self.next_global_slot;
        self.next_global_slot += 1;
        self.globals.insert(name.to_string(), slot);
        slot
    }

    fn emit_item(&mut self, item: &Item, ctx: &mut FnCtx) -> Result<(), CompileError> {
        match item {
            Item::Statement(s) => self.emit_stmt(s, ctx),
            Item::AsmBlock { raw_text, origin_line, .. } => {
                let mut asm = Assembler::new(raw_text, *origin_line);
                let block = asm.assemble()?;
                ctx.code.extend_from_slice(&block.bytes);
                Ok(())
            }
            Item::Export { item, .. } => self.emit_item(item, ctx),
            Item::Namespace { items, .. } => {
                for it in items {
                    self.emit_item(it, ctx)?;
                }
                Ok(())
            }
            Item::Function(_) | Item::Class(_) | Item::Struct(_) | Item::Enum(_) | Item::Interface(_) | Item::Import { .. } => {
                Ok(())
            }
        }
    }

    fn emit_stmt(&mut self, stmt: &Stmt, ctx: &mut FnCtx) -> Result<(), CompileError> {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.emit_expr(value, ctx)?;
                if ctx.top_level {
                    // Module-scope binding (spec section 4.5): stored as a
                    // VM global, not a frame-local, so it outlives
                    // `<module>` returning and an `export` of it can be
                    // read back after the module has run.
                    let slot = self.global_slot(name);
                    push_opcode(&mut ctx.code, Opcode::STORE_GLOBAL);
                    push_immediate(&mut ctx.code, slot as i64);
                } else {
                    let slot = ctx.declare_local(name);
                    push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                    push_immediate(&mut ctx.code, slot as i64);
                }
                Ok(())
            }
            Stmt::Assign { target, value, .. } => self.emit_assign(target, value, ctx),
            Stmt::ExprStmt(e) => {
                self.emit_expr(e, ctx)?;
                push_opcode(&mut ctx.code, Opcode::POP);
                Ok(())
            }
            Stmt::If { cond, then_branch, else_branch, .. } => {
                self.emit_expr(cond, ctx)?;
                let else_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JZ);
                ctx.push_scope();
                for s in then_branch {
                    self.emit_stmt(s, ctx)?;
                }
                ctx.pop_scope();
                if let Some(else_branch) = else_branch {
                    let end_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JMP);
                    patch_jump(&mut ctx.code, else_jump);
                    ctx.push_scope();
                    for s in else_branch {
                        self.emit_stmt(s, ctx)?;
                    }
                    ctx.pop_scope();
                    patch_jump(&mut ctx.code, end_jump);
                } else {
                    patch_jump(&mut ctx.code, else_jump);
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                let loop_start = ctx.code.len() as u32;
                self.emit_expr(cond, ctx)?;
                let exit_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JZ);
                ctx.loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new() });
                ctx.push_scope();
                for s in body {
                    self.emit_stmt(s, ctx)?;
                }
                ctx.pop_scope();
                let loop_ctx = ctx.loops.pop().unwrap();
                let continue_target = ctx.code.len() as u32;
                for p in loop_ctx.continue_patches {
                    patch_jump_to(&mut ctx.code, p, continue_target);
                }
                emit_jump_to(&mut ctx.code, Opcode::JMP, loop_start);
                let after = ctx.code.len() as u32;
                patch_jump_to(&mut ctx.code, exit_jump, after);
                for p in loop_ctx.break_patches {
                    patch_jump_to(&mut ctx.code, p, after);
                }
                Ok(())
            }
            Stmt::For { var, from, through, step, body, .. } => {
                self.emit_expr(from, ctx)?;
                let slot = ctx.declare_local(var);
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);

                let loop_start = ctx.code.len() as u32;
                push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);
                self.emit_expr(through, ctx)?;
                push_opcode(&mut ctx.code, Opcode::LT);
                let exit_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JZ);

                ctx.loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new() });
                ctx.push_scope();
                for s in body {
                    self.emit_stmt(s, ctx)?;
                }
                ctx.pop_scope();
                let loop_ctx = ctx.loops.pop().unwrap();
                let continue_target = ctx.code.len() as u32;
                for p in loop_ctx.continue_patches {
                    patch_jump_to(&mut ctx.code, p, continue_target);
                }

                push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);
                if let Some(step) = step {
                    self.emit_expr(step, ctx)?;
                } else {
                    push_opcode(&mut ctx.code, Opcode::PUSH);
                    push_immediate(&mut ctx.code, self.intern_const(Constant::Int(1)));
                }
                push_opcode(&mut ctx.code, Opcode::ADD);
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);

                emit_jump_to(&mut ctx.code, Opcode::JMP, loop_start);
                let after = ctx.code.len() as u32;
                patch_jump_to(&mut ctx.code, exit_jump, after);
                for p in loop_ctx.break_patches {
                    patch_jump_to(&mut ctx.code, p, after);
                }
                Ok(())
            }
            Stmt::ForEach { var, iterable, body, .. } => {
                self.emit_expr(iterable, ctx)?;
                push_opcode(&mut ctx.code, Opcode::ITER_NEW);
                let iter_slot = ctx.declare_local("__iter");
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, iter_slot as i64);

                let loop_start = ctx.code.len() as u32;
                push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                push_immediate(&mut ctx.code, iter_slot as i64);
                push_opcode(&mut ctx.code, Opcode::ITER_DONE);
                let exit_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JNZ);

                push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                push_immediate(&mut ctx.code, iter_slot as i64);
                push_opcode(&mut ctx.code, Opcode::ITER_NEXT);
                let var_slot = ctx.declare_local(var);
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, var_slot as i64);

                ctx.loops.push(LoopContext { break_patches: Vec::new(), continue_patches: Vec::new() });
                ctx.push_scope();
                for s in body {
                    self.emit_stmt(s, ctx)?;
                }
                ctx.pop_scope();
                let loop_ctx = ctx.loops.pop().unwrap();
                let continue_target = ctx.code.len() as u32;
                for p in loop_ctx.continue_patches {
                    patch_jump_to(&mut ctx.code, p, continue_target);
                }
                emit_jump_to(&mut ctx.code, Opcode::JMP, loop_start);
                let after = ctx.code.len() as u32;
                patch_jump_to(&mut ctx.code, exit_jump, after);
                for p in loop_ctx.break_patches {
                    patch_jump_to(&mut ctx.code, p, after);
                }
                Ok(())
            }
            Stmt::Match { scrutinee, arms, .. } => self.emit_match(scrutinee, arms, ctx),
            Stmt::Return { value, .. } => {
                match value {
                    Some(e) => self.emit_expr(e, ctx)?,
                    None => {
                        push_opcode(&mut ctx.code, Opcode::PUSH);
                        let idx = self.intern_null();
                        push_immediate(&mut ctx.code, idx);
                    }
                }
                push_opcode(&mut ctx.code, Opcode::RET);
                Ok(())
            }
            Stmt::Break { .. } => {
                let p = emit_jump_placeholder(&mut ctx.code, Opcode::JMP);
                ctx.loops
                    .last_mut()
                    .ok_or_else(|| CompileError::InvalidBreakContinue("break".to_string()))?
                    .break_patches
                    .push(p);
                Ok(())
            }
            Stmt::Continue { .. } => {
                let p = emit_jump_placeholder(&mut ctx.code, Opcode::JMP);
                ctx.loops
                    .last_mut()
                    .ok_or_else(|| CompileError::InvalidBreakContinue("continue".to_string()))?
                    .continue_patches
                    .push(p);
                Ok(())
            }
            Stmt::Throw { value, .. } => {
                self.emit_expr(value, ctx)?;
                push_opcode(&mut ctx.code, Opcode::THROW);
                Ok(())
            }
            Stmt::Print { value, .. } => {
                self.emit_expr(value, ctx)?;
                push_opcode(&mut ctx.code, Opcode::PRINT);
                Ok(())
            }
            Stmt::Try { body, catches, finally, .. } => self.emit_try(body, catches, finally, ctx),
            Stmt::Block { body, .. } => {
                ctx.push_scope();
                for s in body {
                    self.emit_stmt(s, ctx)?;
                }
                ctx.pop_scope();
                Ok(())
            }
        }
    }

    fn emit_try(
        &mut self,
        body: &Block,
        catches: &[CatchClause],
        finally: &Option<Block>,
        ctx: &mut FnCtx,
    ) -> Result<(), CompileError> {
        let exception_type_index = catches
            .first()
            .and_then(|c| c.exception_type.as_ref())
            .map(|name| self.intern_const(Constant::Str(name.clone())) as u32);
        let try_start = ctx.code.len() as u32;
        push_opcode(&mut ctx.code, Opcode::BEGIN_TRY);
        // Handler offset is patched in after the handler body is emitted;
        // the immediate is a fixed-width (W4) absolute offset, since (like
        // jump targets) it isn't known until the handler body is emitted.
        ctx.code.push(ImmWidth::W4 as u8);
        let handler_placeholder_pos = ctx.code.len();
        ctx.code.extend_from_slice(&0i32.to_le_bytes());
        ctx.push_scope();
        for s in body {
            self.emit_stmt(s, ctx)?;
        }
        ctx.pop_scope();
        push_opcode(&mut ctx.code, Opcode::END_TRY);
        let skip_handlers = emit_jump_placeholder(&mut ctx.code, Opcode::JMP);
        let try_end = ctx.code.len() as u32;

        let handler_offset = ctx.code.len() as u32;
        write_u32_at(&mut ctx.code, handler_placeholder_pos, handler_offset);
        for catch in catches {
            ctx.push_scope();
            if let Some(binding) = &catch.binding {
                let slot = ctx.declare_local(binding);
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);
            } else {
                push_opcode(&mut ctx.code, Opcode::POP);
            }
            for s in &catch.body {
                self.emit_stmt(s, ctx)?;
            }
            ctx.pop_scope();
        }
        patch_jump(&mut ctx.code, skip_handlers);

        if let Some(finally) = finally {
            ctx.push_scope();
            for s in finally {
                self.emit_stmt(s, ctx)?;
            }
            ctx.pop_scope();
        }

        ctx.handlers.push(HandlerEntry {
            try_start,
            try_end,
            handler_offset,
            exception_type_index,
            fn_index: 0,
        });
        Ok(())
    }

    fn emit_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], ctx: &mut FnCtx) -> Result<(), CompileError> {
        self.emit_expr(scrutinee, ctx)?;
        let scrutinee_slot = ctx.declare_local("__match_scrutinee");
        push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
        push_immediate(&mut ctx.code, scrutinee_slot as i64);

        let mut end_jumps = Vec::new();
        for arm in arms {
            push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
            push_immediate(&mut ctx.code, scrutinee_slot as i64);
            let bound_name = self.emit_pattern_test(&arm.pattern, ctx)?;
            let next_arm_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JZ);

            ctx.push_scope();
            if let Some(name) = &bound_name {
                push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                push_immediate(&mut ctx.code, scrutinee_slot as i64);
                let slot = ctx.declare_local(name);
                push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                push_immediate(&mut ctx.code, slot as i64);
            }
            for s in &arm.body {
                self.emit_stmt(s, ctx)?;
            }
            ctx.pop_scope();
            end_jumps.push(emit_jump_placeholder(&mut ctx.code, Opcode::JMP));
            patch_jump(&mut ctx.code, next_arm_jump);
        }
        for j in end_jumps {
            patch_jump(&mut ctx.code, j);
        }
        Ok(())
    }

    /// Emits code that leaves a bool on the stack: true if the scrutinee
    /// (already pushed) matches `pattern`. Returns a binding name to load
    /// into a local if the arm is taken.
    fn emit_pattern_test(&mut self, pattern: &Pattern, ctx: &mut FnCtx) -> Result<Option<String>, CompileError> {
        match pattern {
            Pattern::Wildcard => {
                push_opcode(&mut ctx.code, Opcode::POP);
                push_opcode(&mut ctx.code, Opcode::PUSH);
                let idx = self.intern_const(Constant::Bool(true));
                push_immediate(&mut ctx.code, idx);
                Ok(None)
            }
            Pattern::Binding(name) => {
                push_opcode(&mut ctx.code, Opcode::POP);
                push_opcode(&mut ctx.code, Opcode::PUSH);
                let idx = self.intern_const(Constant::Bool(true));
                push_immediate(&mut ctx.code, idx);
                Ok(Some(name.clone()))
            }
            Pattern::Literal(lit) => {
                let value_idx = self.intern_const(literal_to_constant(lit));
                push_opcode(&mut ctx.code, Opcode::PUSH);
                push_immediate(&mut ctx.code, value_idx);
                push_opcode(&mut ctx.code, Opcode::EQ);
                Ok(None)
            }
            Pattern::EnumVariant { variant, .. } => {
                let idx = self.intern_const(Constant::Str(variant.clone()));
                push_opcode(&mut ctx.code, Opcode::PUSH);
                push_immediate(&mut ctx.code, idx);
                push_opcode(&mut ctx.code, Opcode::EQ);
                Ok(None)
            }
            Pattern::List(_) => Err(CompileError::Unsupported("list patterns".to_string())),
        }
    }

    fn emit_assign(&mut self, target: &Expr, value: &Expr, ctx: &mut FnCtx) -> Result<(), CompileError> {
        match target {
            Expr::Identifier { name, .. } => {
                self.emit_expr(value, ctx)?;
                if let Some(slot) = ctx.resolve_local(name) {
                    push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
                    push_immediate(&mut ctx.code, slot as i64);
                } else {
                    let slot = self.global_slot(name);
                    push_opcode(&mut ctx.code, Opcode::STORE_GLOBAL);
                    push_immediate(&mut ctx.code, slot as i64);
                }
                Ok(())
            }
            Expr::FieldAccess { object, field, .. } => {
                self.emit_expr(object, ctx)?;
                self.emit_expr(value, ctx)?;
                let idx = self.intern_const(Constant::Str(field.clone()));
                push_opcode(&mut ctx.code, Opcode::SET_FIELD);
                push_immediate(&mut ctx.code, idx);
                Ok(())
            }
            Expr::Index { object, index, .. } => {
                self.emit_expr(object, ctx)?;
                self.emit_expr(index, ctx)?;
                self.emit_expr(value, ctx)?;
                push_opcode(&mut ctx.code, Opcode::SET_INDEX);
                Ok(())
            }
            Expr::Deref { pointer, .. } => {
                self.emit_expr(pointer, ctx)?;
                self.emit_expr(value, ctx)?;
                push_opcode(&mut ctx.code, Opcode::STORE_QWORD);
                Ok(())
            }
            _ => Err(CompileError::Unsupported("assignment target".to_string())),
        }
    }

    fn emit_expr(&mut self, expr: &Expr, ctx: &mut FnCtx) -> Result<(), CompileError> {
        match expr {
            Expr::Literal { value, .. } => {
                let idx = self.intern_const(literal_to_constant(value));
                push_opcode(&mut ctx.code, Opcode::PUSH);
                push_immediate(&mut ctx.code, idx);
                Ok(())
            }
            Expr::Identifier { name, .. } | Expr::GreekSymbol { name, .. } => {
                if let Some(slot) = ctx.resolve_local(name) {
                    push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
                    push_immediate(&mut ctx.code, slot as i64);
                } else if let Some(&fn_idx) = self.function_index.get(name) {
                    push_opcode(&mut ctx.code, Opcode::CLOSURE);
                    push_immediate(&mut ctx.code, fn_idx as i64);
                } else if let Some(&slot) = self.globals.get(name) {
                    push_opcode(&mut ctx.code, Opcode::LOAD_GLOBAL);
                    push_immediate(&mut ctx.code, slot as i64);
                } else {
                    let slot = self.global_slot(name);
                    push_opcode(&mut ctx.code, Opcode::LOAD_GLOBAL);
                    push_immediate(&mut ctx.code, slot as i64);
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.emit_expr(lhs, ctx)?;
                self.emit_expr(rhs, ctx)?;
                push_opcode(&mut ctx.code, binary_opcode(op));
                Ok(())
            }
            Expr::NaturalComparison { op, lhs, rhs, .. } => {
                self.emit_expr(lhs, ctx)?;
                self.emit_expr(rhs, ctx)?;
                push_opcode(&mut ctx.code, binary_opcode(op));
                Ok(())
            }
            Expr::Unary { op, operand, .. } => {
                self.emit_expr(operand, ctx)?;
                match op {
                    UnaryOp::Neg => push_opcode(&mut ctx.code, Opcode::NEG),
                    UnaryOp::Not => push_opcode(&mut ctx.code, Opcode::NOT),
                    UnaryOp::BitNot => push_opcode(&mut ctx.code, Opcode::NOT),
                    UnaryOp::AddressOf => {}
                    UnaryOp::Deref => push_opcode(&mut ctx.code, Opcode::LOAD_QWORD),
                }
                Ok(())
            }
            Expr::Deref { pointer, .. } => {
                self.emit_expr(pointer, ctx)?;
                push_opcode(&mut ctx.code, Opcode::LOAD_QWORD);
                Ok(())
            }
            Expr::Call { callee, args, .. } => {
                // `register(n)` is a reserved intrinsic, not a callable:
                // it reads the `@asm` register file's slot `n` (spec
                // section 4.2) rather than invoking a guest function. It
                // takes priority over the function-table lookup below so a
                // guest can never shadow it by declaring their own `fn
                // register`.
                if let Expr::Identifier { name, .. } = callee.as_ref() {
                    if name == "register" {
                        let idx = match args.as_slice() {
                            [Expr::Literal { value: Literal::Int(n), .. }] => *n,
                            _ => {
                                return Err(CompileError::Unsupported(
                                    "register(n) requires a single integer literal argument".to_string(),
                                ))
                            }
                        };
                        if idx < 0 || idx as usize >= ouro_core::asmreg::REGISTER_COUNT {
                            return Err(CompileError::Unsupported(format!("register index out of range: {idx}")));
                        }
                        push_opcode(&mut ctx.code, Opcode::LOAD_REG);
                        push_immediate(&mut ctx.code, idx);
                        return Ok(());
                    }
                }
                // A direct call to a known function name is resolved to its
                // function-table index at compile time, so the args are the
                // only values CALL needs on the stack; evaluating the callee
                // too (as the indirect path below does, via CLOSURE) would
                // leave an unconsumed value under them.
                if let Expr::Identifier { name, .. } = callee.as_ref() {
                    if let Some(&fn_idx) = self.function_index.get(name) {
                        for a in args {
                            self.emit_expr(a, ctx)?;
                        }
                        push_opcode(&mut ctx.code, Opcode::CALL);
                        push_immediate(&mut ctx.code, fn_idx as i64);
                        return Ok(());
                    }
                }
                // Indirect call: callee value sits under its arguments, so
                // the VM can't locate it without knowing how many args were
                // pushed. Encode that count into the negative operand as
                // `-(argc + 1)`, distinguishing it from a direct call's
                // non-negative function-table index.
                self.emit_expr(callee, ctx)?;
                for a in args {
                    self.emit_expr(a, ctx)?;
                }
                push_opcode(&mut ctx.code, Opcode::CALL);
                push_immediate(&mut ctx.code, -(args.len() as i64 + 1));
                Ok(())
            }
            Expr::FieldAccess { object, field, .. } => {
                self.emit_expr(object, ctx)?;
                let idx = self.intern_const(Constant::Str(field.clone()));
                push_opcode(&mut ctx.code, Opcode::GET_FIELD);
                push_immediate(&mut ctx.code, idx);
                Ok(())
            }
            Expr::Index { object, index, .. } => {
                self.emit_expr(object, ctx)?;
                self.emit_expr(index, ctx)?;
                push_opcode(&mut ctx.code, Opcode::GET_INDEX);
                Ok(())
            }
            Expr::ListLiteral { elements, .. } => {
                push_opcode(&mut ctx.code, Opcode::NEW_LIST);
                for e in elements {
                    self.emit_expr(e, ctx)?;
                    push_opcode(&mut ctx.code, Opcode::PUSH_ACC);
                }
                push_opcode(&mut ctx.code, Opcode::END_COLLECTION);
                Ok(())
            }
            Expr::MapLiteral { entries, .. } => {
                push_opcode(&mut ctx.code, Opcode::NEW_MAP);
                for (k, v) in entries {
                    self.emit_expr(k, ctx)?;
                    self.emit_expr(v, ctx)?;
                    push_opcode(&mut ctx.code, Opcode::PUSH_ACC);
                }
                push_opcode(&mut ctx.code, Opcode::END_COLLECTION);
                Ok(())
            }
            Expr::StructLiteral { type_name, fields, .. } => {
                // NEW_INSTANCE's operand is always a struct-table index;
                // class instances are built through constructor calls, not
                // this literal syntax, so there's no table to disambiguate.
                let idx = self
                    .struct_table
                    .iter()
                    .position(|s| &s.name == type_name)
                    .ok_or_else(|| CompileError::UndefinedName(type_name.clone()))?;
                push_opcode(&mut ctx.code, Opcode::NEW_INSTANCE);
                push_immediate(&mut ctx.code, idx as i64);
                for (name, value) in fields {
                    push_opcode(&mut ctx.code, Opcode::DUP);
                    self.emit_expr(value, ctx)?;
                    let field_idx = self.intern_const(Constant::Str(name.clone()));
                    push_opcode(&mut ctx.code, Opcode::SET_FIELD);
                    push_immediate(&mut ctx.code, field_idx);
                }
                Ok(())
            }
            Expr::Aggregate { op, var, iterable, body, .. } => self.emit_aggregate(op, var, iterable, body, ctx),
            Expr::Await { value, .. } => {
                self.emit_expr(value, ctx)?;
                push_opcode(&mut ctx.code, Opcode::AWAIT);
                ctx.suspend_points.push(ctx.code.len() as u32);
                Ok(())
            }
            Expr::Yield { value, .. } => {
                match value {
                    Some(e) => self.emit_expr(e, ctx)?,
                    None => {
                        push_opcode(&mut ctx.code, Opcode::PUSH);
                        let idx = self.intern_null();
                        push_immediate(&mut ctx.code, idx);
                    }
                }
                push_opcode(&mut ctx.code, Opcode::YIELD);
                ctx.suspend_points.push(ctx.code.len() as u32);
                Ok(())
            }
            Expr::Lambda { params, body, .. } => {
                let idx = self.declare_function(FunctionDecl {
                    name: format!("<lambda@{}>", self.function_table.len()),
                    params: params.clone(),
                    body: body.clone(),
                    is_async: false,
                    is_public: false,
                    register: RegisterTier::Medium,
                    span: expr.span(),
                })?;
                push_opcode(&mut ctx.code, Opcode::CLOSURE);
                push_immediate(&mut ctx.code, idx as i64);
                Ok(())
            }
            Expr::InterpolatedString { segments, .. } => self.emit_interp(segments, ctx),
        }
    }

    fn emit_interp(&mut self, segments: &[InterpSegment], ctx: &mut FnCtx) -> Result<(), CompileError> {
        let empty_idx = self.intern_const(Constant::Str(String::new()));
        push_opcode(&mut ctx.code, Opcode::PUSH);
        push_immediate(&mut ctx.code, empty_idx);
        for seg in segments {
            match seg {
                InterpSegment::Literal(text) => {
                    let idx = self.intern_const(Constant::Str(text.clone()));
                    push_opcode(&mut ctx.code, Opcode::PUSH);
                    push_immediate(&mut ctx.code, idx);
                }
                InterpSegment::Expr(e) => self.emit_expr(e, ctx)?,
            }
            push_opcode(&mut ctx.code, Opcode::ADD);
        }
        Ok(())
    }

    fn emit_aggregate(
        &mut self,
        op: &AggregateOp,
        var: &str,
        iterable: &Expr,
        body: &Expr,
        ctx: &mut FnCtx,
    ) -> Result<(), CompileError> {
        let acc_kind = match op {
            AggregateOp::Sum => 0,
            AggregateOp::Product => 1,
            AggregateOp::Min => 2,
            AggregateOp::Max => 3,
            AggregateOp::Average => 4,
        };
        push_opcode(&mut ctx.code, Opcode::NEW_ACC);
        push_immediate(&mut ctx.code, acc_kind);

        self.emit_expr(iterable, ctx)?;
        push_opcode(&mut ctx.code, Opcode::ITER_NEW);
        let iter_slot = ctx.declare_local("__agg_iter");
        push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
        push_immediate(&mut ctx.code, iter_slot as i64);

        let loop_start = ctx.code.len() as u32;
        push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
        push_immediate(&mut ctx.code, iter_slot as i64);
        push_opcode(&mut ctx.code, Opcode::ITER_DONE);
        let exit_jump = emit_jump_placeholder(&mut ctx.code, Opcode::JNZ);

        push_opcode(&mut ctx.code, Opcode::LOAD_LOCAL);
        push_immediate(&mut ctx.code, iter_slot as i64);
        push_opcode(&mut ctx.code, Opcode::ITER_NEXT);
        ctx.push_scope();
        let var_slot = ctx.declare_local(var);
        push_opcode(&mut ctx.code, Opcode::STORE_LOCAL);
        push_immediate(&mut ctx.code, var_slot as i64);

        self.emit_expr(body, ctx)?;
        push_opcode(&mut ctx.code, Opcode::PUSH_ACC);
        ctx.pop_scope();

        emit_jump_to(&mut ctx.code, Opcode::JMP, loop_start);
        let after = ctx.code.len() as u32;
        patch_jump_to(&mut ctx.code, exit_jump, after);
        push_opcode(&mut ctx.code, Opcode::POP_ACC);
        Ok(())
    }
}

/// The inverse of `Constant::to_value`, for binding an imported module's
/// exported value into the importer's own constant pool (see
/// `Emitter::emit_import_binding`). `None` for heap-object values (lists,
/// maps, structs, functions, ...) that have no constant-pool representation.
fn value_to_constant(value: &ouro_core::value::Value) -> Option<Constant> {
    use ouro_core::value::Value;
    match value {
        Value::Null => Some(Constant::Null),
        Value::Bool(b) => Some(Constant::Bool(*b)),
        Value::Int(n) => Some(Constant::Int(*n)),
        Value::Float(n) => Some(Constant::Float(*n)),
        Value::UnitNumber(n, u) => Some(Constant::UnitNumber(*n, u.to_string())),
        Value::Str(s) => Some(Constant::Str(s.to_string())),
        Value::Bytes(b) => Some(Constant::Bytes(b.borrow().clone())),
        _ => None,
    }
}

fn literal_to_constant(lit: &Literal) -> Constant {
    match lit {
        Literal::Int(n) => Constant::Int(*n),
        Literal::Float(n) => Constant::Float(*n),
        Literal::Str(s) => Constant::Str(s.clone()),
        Literal::Bool(b) => Constant::Bool(*b),
        Literal::Null => Constant::Null,
        Literal::UnitNumber(n, u) => Constant::UnitNumber(*n, u.clone()),
    }
}

fn binary_opcode(op: &BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::ADD,
        BinaryOp::Sub => Opcode::SUB,
        BinaryOp::Mul => Opcode::MUL,
        BinaryOp::Div => Opcode::DIV,
        BinaryOp::Mod => Opcode::MOD,
        BinaryOp::Pow => Opcode::POW,
        BinaryOp::Eq => Opcode::EQ,
        BinaryOp::NotEq => Opcode::NE,
        BinaryOp::Identical => Opcode::EQ,
        BinaryOp::NotIdentical => Opcode::NE,
        BinaryOp::Lt => Opcode::LT,
        BinaryOp::Gt => Opcode::GT,
        BinaryOp::Le => Opcode::LE,
        BinaryOp::Ge => Opcode::GE,
        BinaryOp::And => Opcode::AND,
        BinaryOp::Or => Opcode::OR,
        BinaryOp::BitAnd => Opcode::AND,
        BinaryOp::BitOr => Opcode::OR,
        BinaryOp::BitXor => Opcode::XOR,
        BinaryOp::Shl => Opcode::SHL,
        BinaryOp::Shr => Opcode::SHR,
    }
}

fn push_opcode(out: &mut Vec<u8>, op: Opcode) {
    out.extend_from_slice(&(op as u16).to_le_bytes());
}

fn push_immediate(out: &mut Vec<u8>, value: i64) {
    let width = ImmWidth::narrowest_for(value);
    out.push(width as u8);
    match width {
        ImmWidth::W1 => out.push(value as i8 as u8),
        ImmWidth::W2 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        ImmWidth::W4 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        ImmWidth::W8 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Emits `opcode` with a fixed-width (W4) placeholder immediate and returns
/// the byte offset of the instruction (not the placeholder) for patching.
fn emit_jump_placeholder(out: &mut Vec<u8>, opcode: Opcode) -> usize {
    let insn_start = out.len();
    push_opcode(out, opcode);
    out.push(ImmWidth::W4 as u8);
    out.extend_from_slice(&0i32.to_le_bytes());
    insn_start
}

fn emit_jump_to(out: &mut Vec<u8>, opcode: Opcode, target: u32) {
    let insn_start = out.len() as i64;
    push_opcode(out, opcode);
    out.push(ImmWidth::W4 as u8);
    out.extend_from_slice(&((target as i64) - insn_start).to_le_bytes()[..4]);
}

/// Patch a jump placeholder to target the current end of the buffer.
fn patch_jump(out: &mut Vec<u8>, insn_start: usize) {
    let target = out.len() as u32;
    patch_jump_to(out, insn_start, target);
}

fn patch_jump_to(out: &mut Vec<u8>, insn_start: usize, target: u32) {
    let rel = target as i64 - insn_start as i64;
    let imm_pos = insn_start + 3; // 2-byte opcode + 1-byte width tag
    write_i32_at(out, imm_pos, rel as i32);
}

fn write_i32_at(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u32_at(out: &mut [u8], pos: usize, value: u32) {
    out[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use ouro_core::SourceId;

    fn compile(src: &str) -> CompiledProgram {
        let mut lexer = Lexer::new(src, SourceId(0));
        let tokens = lexer.tokenize();
        let mut parser = Parser::new(&tokens);
        let program = parser.parse_program();
        assert!(parser.errors.is_empty(), "{:?}", parser.errors);
        Emitter::new().compile(&program, "test.ouro", 0, false).unwrap()
    }

    #[test]
    fn compiles_simple_let_and_arithmetic() {
        let program = compile("let x = 1 + 2;");
        assert!(!program.bytecode.is_empty());
        program.verify().unwrap();
    }

    #[test]
    fn compiles_function_with_call() {
        let program = compile("fn add(a, b) { return a + b; } let r = add(1, 2);");
        assert!(program.function_table.len() >= 2);
        program.verify().unwrap();
    }

    #[test]
    fn compiles_if_else() {
        let program = compile("let x = 1; if x > 0 { x = 2; } else { x = 3; }");
        program.verify().unwrap();
    }

    #[test]
    fn compiles_while_loop_with_break() {
        let program = compile("let i = 0; while i < 10 { i = i + 1; if i === 5 { break; } }");
        program.verify().unwrap();
    }

    #[test]
    fn compiles_try_catch_handler_table() {
        let program = compile("try { throw 1; } catch (e) { let x = e; }");
        assert_eq!(program.exception_handler_table.len(), 1);
        program.verify().unwrap();
    }

    #[test]
    fn compiles_sum_of_all_aggregate() {
        let program = compile("let xs = [1, 2, 3]; let total = sum of all x in xs;");
        program.verify().unwrap();
    }

    #[test]
    fn compiles_inline_asm_block() {
        let program = compile("@asm { push 1\npush 2\nadd\nret }");
        program.verify().unwrap();
    }
}
