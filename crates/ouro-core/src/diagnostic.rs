//! The diagnostic taxonomy from spec section 7.
//!
//! Every phase reports failures as one of the kinds below. `Diagnostic` is
//! the user-facing record the CLI driver prints to stderr; `ErrorKind`
//! distinguishes the phase so the driver can format each one consistently
//! without matching on a string.

use std::fmt;

/// Runtime error subkinds (spec section 7 table, `RuntimeError` row).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("null reference")]
    NullReference,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("index out of range: {index} (length {length})")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("divide by zero")]
    DivideByZero,
    #[error("stack overflow")]
    StackOverflow,
    #[error("unit mismatch: {lhs} vs {rhs}")]
    UnitMismatch { lhs: String, rhs: String },
    #[error("task cancelled")]
    Cancelled,
    #[error("unhandled exception: {0}")]
    Unhandled(String),
}

/// The phase-tagged error kind (spec section 7 table, left column).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("lex error: {0}")]
    Lex(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("compile error: {0}")]
    Compile(String),
    #[error("assembler error: {0}")]
    Asm(String),
    #[error("module error: {0}")]
    Module(String),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeErrorKind),
    #[error("I/O error: {0}")]
    Io(String),
    /// An internal invariant was violated (verifier contradiction, assertion
    /// failure). Rendered distinctly from user errors so a user knows to
    /// file a bug, per spec section 7.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A single user-visible diagnostic: `{kind, source_file, line, column,
/// human_message}` plus an optional source excerpt with a caret.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub source_file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    pub excerpt: Option<(String, String)>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            source_file: None,
            line: None,
            column: None,
            message: message.into(),
            excerpt: None,
        }
    }

    pub fn at(mut self, source_file: impl Into<String>, line: u32, column: u32) -> Self {
        self.source_file = Some(source_file.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_excerpt(mut self, line_text: impl Into<String>, caret: impl Into<String>) -> Self {
        self.excerpt = Some((line_text.into(), caret.into()));
        self
    }

    /// True for internal/assertion-style failures, as opposed to ordinary
    /// user-caused errors (spec section 7: "distinguished in the output").
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Internal(_))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.is_internal() { "internal error" } else { "error" };
        match (&self.source_file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => {
                writeln!(f, "{}: {} ({}:{}:{})", tag, self.message, file, line + 1, col + 1)?;
            }
            _ => {
                writeln!(f, "{}: {}", tag, self.message)?;
            }
        }
        if let Some((line_text, caret)) = &self.excerpt {
            writeln!(f, "  {}", line_text)?;
            write!(f, "  {}", caret)?;
        }
        Ok(())
    }
}
