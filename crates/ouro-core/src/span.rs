//! Source positions, shared by the lexer, parser, assembler and emitter.
//!
//! Positions are tracked 0-indexed internally (matching the token stream's
//! natural walk order) and rendered 1-indexed in human-facing diagnostics,
//! following the convention `line + 1` used throughout this codebase.

use std::path::{Path, PathBuf};

/// Identifies one compiled source unit (the main file, or a module pulled
/// in by the loader) inside a `SourceMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// A single position within a source unit: byte offset plus the (line, col)
/// it maps to, so later phases never need to re-scan the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub source: SourceId,
    pub line: u32,
    pub col: u32,
    pub position: u32,
}

impl Default for SourceId {
    fn default() -> Self {
        SourceId(0)
    }
}

impl Span {
    pub fn new(source: SourceId, line: u32, col: u32, position: u32) -> Self {
        Span {
            source,
            line,
            col,
            position,
        }
    }
}

/// Owns the source text for every compiled unit and maps byte offsets to
/// (line, col) pairs. One `SourceMap` is shared by a compile request and
/// everything the module loader pulls into it, so diagnostics from an
/// imported file still carry its own file name.
#[derive(Debug, Default)]
pub struct SourceMap {
    units: Vec<SourceUnit>,
}

#[derive(Debug)]
struct SourceUnit {
    path: PathBuf,
    text: String,
    /// Byte offset of the start of each line, for O(log n) position lookup.
    line_starts: Vec<u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap { units: Vec::new() }
    }

    /// Register a new source unit and return its id.
    pub fn add(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> SourceId {
        let text = text.into();
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        self.units.push(SourceUnit {
            path: path.into(),
            text,
            line_starts,
        });
        SourceId((self.units.len() - 1) as u32)
    }

    pub fn text(&self, id: SourceId) -> &str {
        &self.units[id.0 as usize].text
    }

    pub fn path(&self, id: SourceId) -> &Path {
        &self.units[id.0 as usize].path
    }

    /// Map a byte offset to a 0-indexed (line, col) pair within `id`.
    pub fn line_col(&self, id: SourceId, offset: u32) -> (u32, u32) {
        let unit = &self.units[id.0 as usize];
        let line = match unit.line_starts.binary_search(&offset) {
            Ok(l) => l,
            Err(l) => l.saturating_sub(1),
        };
        let col = offset - unit.line_starts[line];
        (line as u32, col)
    }

    /// A single-line excerpt for a diagnostic, with a caret under `col`.
    pub fn excerpt(&self, id: SourceId, line: u32, col: u32) -> Option<(String, String)> {
        let unit = &self.units[id.0 as usize];
        let start = *unit.line_starts.get(line as usize)? as usize;
        let end = unit
            .line_starts
            .get(line as usize + 1)
            .map(|&e| e as usize)
            .unwrap_or(unit.text.len());
        let line_text = unit.text[start..end].trim_end_matches('\n').to_string();
        let caret = format!("{}^", " ".repeat(col as usize));
        Some((line_text, caret))
    }
}
