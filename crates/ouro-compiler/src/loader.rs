//! Module loader (spec section 4.5/4.6, "Module Loader").
//!
//! Resolves `import` paths to canonical filesystem paths, memoizes already
//! loaded modules by that canonical path, and runs each module's top-level
//! code exactly once to materialise its `export`ed bindings. A module that
//! imports (directly or transitively) back into itself while still loading
//! gets back a partially-initialised record rather than a hard error (spec
//! section 4.5: "the partially-initialised module record... is returned,
//! and a warning is recorded").

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ouro_core::program::{CompiledProgram, ExportBinding};
use ouro_core::value::Value;
use ouro_core::{SourceId, SourceMap};
use ouro_vm::{RunOutcome, Vm};

use crate::ast::{Item, Program};
use crate::emitter::{CompileError, Emitter};
use crate::lexer::Lexer;
use crate::parser::Parser;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModuleError {
    #[error("module not found: '{0}'")]
    NotFound(String),
    #[error("io error reading '{path}': {message}")]
    Io { path: String, message: String },
    #[error("compile error in '{path}': {source}")]
    Compile { path: String, source: CompileError },
    #[error("runtime error running '{path}': {message}")]
    Runtime { path: String, message: String },
    #[error("unhandled exception running '{path}': {value}")]
    Unhandled { path: String, value: String },
}

/// Env var consulted (after the importing file's own directory) when
/// resolving a bare module path, mirroring `PATH`-style lookup.
pub const OURO_PATH_VAR: &str = "OURO_PATH";

/// A loaded module (spec section 3, "Module"): its compiled program plus
/// the realized values of its `export let`/`export const` bindings, read
/// back from the VM's globals after the module's top-level code ran.
///
/// `export fn` bindings resolve structurally through `program.exports`
/// instead (a function index, not a value), so they have no entry here —
/// see `Emitter::emit_import_binding` for why only constant-like exports
/// currently cross a module boundary by value.
#[derive(Debug, Clone, Default)]
pub struct ModuleRecord {
    pub program: CompiledProgram,
    pub exports: HashMap<String, Value>,
    /// Set when this record was handed back mid-load because of an import
    /// cycle: `exports` reflects only what had run by that point (nothing,
    /// in this implementation — see `ModuleLoader::load`), not the
    /// module's eventual final state.
    pub partial: bool,
}

pub struct ModuleLoader {
    /// Canonical path -> loaded module record, populated exactly once per
    /// path (spec section 4.6, "run exactly once").
    cache: HashMap<PathBuf, ModuleRecord>,
    loading: HashSet<PathBuf>,
    search_path: Vec<PathBuf>,
    pub source_map: SourceMap,
}

impl ModuleLoader {
    pub fn new() -> Self {
        let search_path = env::var(OURO_PATH_VAR)
            .map(|v| env::split_paths(&v).collect())
            .unwrap_or_default();
        ModuleLoader {
            cache: std::collections::HashMap::new(),
            loading: HashSet::new(),
            search_path,
            source_map: SourceMap::new(),
        }
    }

    /// Resolve `path` relative to `from_dir`, then each `OURO_PATH` entry.
    pub fn resolve(&self, path: &str, from_dir: &Path) -> Result<PathBuf, ModuleError> {
        let mut candidate = from_dir.join(path);
        if candidate.extension().is_none() {
            candidate.set_extension("ouro");
        }
        if candidate.exists() {
            return candidate
                .canonicalize()
                .map_err(|e| ModuleError::Io { path: path.to_string(), message: e.to_string() });
        }
        for dir in &self.search_path {
            let mut cand = dir.join(path);
            if cand.extension().is_none() {
                cand.set_extension("ouro");
            }
            if cand.exists() {
                return cand
                    .canonicalize()
                    .map_err(|e| ModuleError::Io { path: path.to_string(), message: e.to_string() });
            }
        }
        Err(ModuleError::NotFound(path.to_string()))
    }

    /// Load, compile, and run the module at `canonical_path` exactly once,
    /// returning its module record (or the cached one, on a repeat import
    /// of the same path — spec section 4.6, "run exactly once").
    ///
    /// Resolves and loads this module's own imports first (depth-first),
    /// so their exports are available to bind into this module before its
    /// own top-level code runs. A path re-entered while still loading
    /// (an import cycle) does not error: it gets back an empty, `partial`
    /// record and a recorded warning (spec section 4.5) — this
    /// implementation compiles and runs a module as one atomic step rather
    /// than statement-by-statement, so "exports collected so far" for a
    /// module that hasn't reached that step yet is necessarily empty.
    pub fn load(&mut self, canonical_path: &Path) -> Result<ModuleRecord, ModuleError> {
        if let Some(cached) = self.cache.get(canonical_path) {
            return Ok(cached.clone());
        }
        if !self.loading.insert(canonical_path.to_path_buf()) {
            tracing::warn!(
                path = %canonical_path.display(),
                "cyclic import: returning a partially-initialised module record"
            );
            return Ok(ModuleRecord { partial: true, ..ModuleRecord::default() });
        }

        let result = self.load_uncached(canonical_path);
        self.loading.remove(canonical_path);
        let record = result?;
        self.cache.insert(canonical_path.to_path_buf(), record.clone());
        Ok(record)
    }

    fn load_uncached(&mut self, canonical_path: &Path) -> Result<ModuleRecord, ModuleError> {
        let text = fs::read_to_string(canonical_path).map_err(|e| ModuleError::Io {
            path: canonical_path.display().to_string(),
            message: e.to_string(),
        })?;
        let source_id = self.source_map.add(canonical_path, text.clone());
        let (ast, errors) = parse_source(&text, source_id);
        if let Some(first) = errors.into_iter().next() {
            return Err(ModuleError::Compile {
                path: canonical_path.display().to_string(),
                source: CompileError::Unsupported(first.message),
            });
        }

        let module_dir = canonical_path.parent().unwrap_or_else(|| Path::new("."));
        let mut imported = HashMap::new();
        for item in &ast.items {
            if let Item::Import { path, .. } = item {
                let dep_path = self.resolve(path, module_dir)?;
                let dep_record = self.load(&dep_path)?;
                imported.extend(dep_record.exports);
            }
        }

        let file_name = canonical_path.display().to_string();
        let program = Emitter::new()
            .compile_with_imports(&ast, &file_name, 0, false, &imported)
            .map_err(|e| ModuleError::Compile { path: file_name.clone(), source: e })?;

        let mut vm = Vm::new(Rc::new(program.clone()));
        loop {
            match vm.run().map_err(|e| ModuleError::Runtime { path: file_name.clone(), message: e.to_string() })? {
                RunOutcome::Halted(_) => break,
                RunOutcome::Suspended(_) => continue,
                RunOutcome::Threw(v) => {
                    return Err(ModuleError::Unhandled { path: file_name, value: v.to_string() });
                }
            }
        }

        let exports = program
            .exports
            .iter()
            .filter_map(|(name, binding)| match binding {
                ExportBinding::Global(slot) => vm.global(*slot).map(|v| (name.clone(), v)),
                ExportBinding::Function(_) => None,
            })
            .collect();

        Ok(ModuleRecord { program, exports, partial: false })
    }

    /// Marks `path` as currently loading without actually loading it —
    /// used by the CLI driver to register the entry file (compiled
    /// directly, bypassing this loader, so its own `--debug` flag is
    /// honored) so that a dependency importing back into the entry file
    /// is treated as the same kind of cycle as any other, instead of
    /// silently recompiling and re-running the entry file a second time.
    pub fn mark_loading(&mut self, path: &Path) {
        self.loading.insert(path.to_path_buf());
    }

    pub fn unmark_loading(&mut self, path: &Path) {
        self.loading.remove(path);
    }

    pub fn is_cached(&self, canonical_path: &Path) -> bool {
        self.cache.contains_key(canonical_path)
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse errors are collected rather than returned as a `Result`, so a
/// single compile error doesn't lose the rest of the diagnostics; the
/// loader surfaces the first one as the module's `ModuleError::Compile`.
pub fn parse_source(text: &str, source_id: SourceId) -> (Program, Vec<crate::parser::ParseError>) {
    let mut lexer = Lexer::new(text, source_id);
    let tokens = lexer.tokenize();
    let mut parser = Parser::new(&tokens);
    let program = parser.parse_program();
    (program, parser.errors)
}

pub fn compile_source(text: &str, source_id: SourceId, file_name: &str) -> Result<CompiledProgram, CompileError> {
    let (program, errors) = parse_source(text, source_id);
    if let Some(first) = errors.into_iter().next() {
        return Err(CompileError::Unsupported(first.message));
    }
    Emitter::new().compile(&program, file_name, 0, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memoizes_repeated_import_of_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("mod_a.ouro");
        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, "let x = 1;").unwrap();

        let mut loader = ModuleLoader::new();
        let canonical = file_path.canonicalize().unwrap();
        let first = loader.load(&canonical).unwrap();
        assert!(loader.is_cached(&canonical));
        let second = loader.load(&canonical).unwrap();
        assert_eq!(first.program.source_file, second.program.source_file);
    }

    #[test]
    fn reports_not_found_for_missing_module() {
        let loader = ModuleLoader::new();
        let result = loader.resolve("does_not_exist", Path::new("."));
        assert!(matches!(result, Err(ModuleError::NotFound(_))));
    }

    #[test]
    fn reentrant_load_returns_partial_record_with_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("cyclic.ouro");
        fs::write(&file_path, "let x = 1;").unwrap();
        let mut loader = ModuleLoader::new();
        let canonical = file_path.canonicalize().unwrap();
        loader.mark_loading(&canonical);
        let record = loader.load(&canonical).unwrap();
        assert!(record.partial);
        assert!(record.exports.is_empty());
    }
}
