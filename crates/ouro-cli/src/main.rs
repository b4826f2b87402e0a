//! The Ouroboros language driver (spec section 6, "External interfaces").
//!
//! `ouro [flags] [file]`: compiles a `.ouro`/`.ou` source file (or loads a
//! precompiled bytecode container) and runs it to completion, mapping the
//! guest program's outcome onto a process exit code.

mod container;
mod imports;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser as ClapParser;
use ouro_compiler::emitter::Emitter;
use ouro_compiler::loader::ModuleLoader;
use ouro_core::program::CompiledProgram;
use ouro_core::Value;
use ouro_vm::{RunOutcome, Vm};

/// Env var equivalent of `--debug`, consulted when the flag is absent
/// (spec section 6, "Env vars").
const OURO_DEBUG_VAR: &str = "OURO_DEBUG";

#[derive(ClapParser)]
#[command(name = "ouro")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run Ouroboros programs", long_about = None)]
struct Cli {
    /// Source file to run (.ouro, .ou, or a precompiled bytecode container)
    file: Option<PathBuf>,

    /// Verbose tracing and debug metadata embedded in the compiled program
    #[arg(long)]
    debug: bool,
}

#[derive(Debug)]
enum CliError {
    Io { path: PathBuf, message: String },
    Compile(String),
    Module(String),
    Runtime(String),
    Unhandled(String),
}

impl CliError {
    fn io(path: &Path, e: std::io::Error) -> Self {
        CliError::Io { path: path.to_path_buf(), message: e.to_string() }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io { path, message } => write!(f, "error: {}: {}", path.display(), message),
            CliError::Compile(msg) => write!(f, "error: {msg}"),
            CliError::Module(msg) => write!(f, "error: {msg}"),
            CliError::Runtime(msg) => write!(f, "error: {msg}"),
            CliError::Unhandled(msg) => write!(f, "error: unhandled exception: {msg}"),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = cli.debug || std::env::var(OURO_DEBUG_VAR).is_ok();
    init_tracing(debug);

    let Some(path) = cli.file else {
        eprintln!("error: no input file (try `ouro --help`)");
        return ExitCode::from(1);
    };

    match run_file(&path, debug) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_file(path: &Path, debug: bool) -> Result<ExitCode, CliError> {
    let bytes = std::fs::read(path).map_err(|e| CliError::io(path, e))?;

    let program = if container::is_container(&bytes) {
        container::read(&bytes).map_err(|e| CliError::Compile(e.to_string()))?
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|e| CliError::Compile(format!("source is not valid UTF-8: {e}")))?;
        compile_with_imports(path, &text, debug)?
    };

    run_program(program)
}

/// Runs every directly imported module to completion (and, transitively,
/// whatever they import — `ModuleLoader::load` handles that and memoizes
/// by canonical path, spec section 4.6), then compiles the entry file
/// itself with their exported bindings in scope, honoring `--debug`/
/// `OURO_DEBUG` for the latter (imported modules always compile without
/// debug metadata, matching `ModuleLoader::load`).
///
/// The entry file is marked as "loading" before its own imports are
/// resolved (and unmarked after) so that a dependency importing back into
/// the entry file is treated as the same kind of cycle `ModuleLoader::load`
/// already handles for every other module, instead of silently triggering
/// a second, separate compile-and-run of the entry file.
fn compile_with_imports(path: &Path, text: &str, debug: bool) -> Result<CompiledProgram, CliError> {
    let ast = imports::parse_source(text);
    let program_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut loader = ModuleLoader::new();
    let canonical_entry = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    loader.mark_loading(&canonical_entry);
    let bindings = imports::resolve_imports(&mut loader, &ast, program_dir);
    loader.unmark_loading(&canonical_entry);
    let bindings = bindings?;

    Emitter::new()
        .compile_with_imports(&ast, &path.display().to_string(), 0, debug, &bindings)
        .map_err(|e| CliError::Compile(e.to_string()))
}

/// Runs `program` to completion, resuming immediately on every suspension
/// point (the CLI is the only task in flight, so there is never anything
/// else to round-robin with) and mapping the outcome to an exit code per
/// spec section 6: a top-level integer return in `[0, 255]` becomes the
/// process exit code, otherwise success is `0` and a thrown/runtime error
/// is `1`.
fn run_program(program: CompiledProgram) -> Result<ExitCode, CliError> {
    let mut vm = Vm::new(Rc::new(program));
    loop {
        match vm.run().map_err(|e| CliError::Runtime(e.to_string()))? {
            RunOutcome::Halted(Value::Int(n)) if (0..=255).contains(&n) => {
                return Ok(ExitCode::from(n as u8));
            }
            RunOutcome::Halted(_) => return Ok(ExitCode::from(0)),
            RunOutcome::Suspended(_) => continue,
            RunOutcome::Threw(v) => return Err(CliError::Unhandled(format!("{v}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn runs_a_program_that_returns_an_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir, "main.ouro", "return 7;");
        let code = run_file(&path, false).unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(7)));
    }

    #[test]
    fn runs_a_program_that_prints_then_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir, "main.ouro", "print \"hello\";");
        let code = run_file(&path, false).unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(0)));
    }

    #[test]
    fn reports_unhandled_exceptions_as_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir, "main.ouro", "throw \"boom\";");
        let result = run_file(&path, false);
        assert!(matches!(result, Err(CliError::Unhandled(_))));
    }

    #[test]
    fn runs_imported_module_top_level_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        write_source(&dir, "greet.ouro", "print \"hi from greet\";");
        let main_path = write_source(
            &dir,
            "main.ouro",
            "import \"greet\"; import \"greet\"; return 0;",
        );
        let code = run_file(&main_path, false).unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(0)));
    }

    #[test]
    fn round_trips_a_bytecode_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir, "main.ouro", "return 42;");
        let text = std::fs::read_to_string(&path).unwrap();
        let compiled = compile_with_imports(&path, &text, false).unwrap();
        let bytes = container::write(&compiled).unwrap();

        let container_path = dir.path().join("main.ourobc");
        std::fs::write(&container_path, &bytes).unwrap();
        let code = run_file(&container_path, false).unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(42)));
    }
}
