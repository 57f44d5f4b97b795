//! Source location tracking for error reporting.
//!
//! Provides [`Span`] for a line:column position and [`SourceLocation`]
//! for a position inside a named source file.

use std::fmt;

/// A position in source code.
///
/// The translator records one of these before every action it schedules,
/// so errors can point at the statement that caused them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Line number (1-indexed, 0 when unknown).
    pub line: u32,
    /// Column number (1-indexed, 0 when unknown).
    pub col: u32,
}

impl Span {
    /// Create a new span from a line and column.
    #[inline]
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Whether this span points at a real position.
    #[inline]
    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A span inside a particular source file.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SourceLocation {
    /// The file identifier handed to `enter_file`, if a file was open.
    pub file: Option<String>,
    /// Position inside the file.
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: Option<String>, span: Span) -> Self {
        Self { file, span }
    }
}

impl fmt::Debug for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "'{}' at ({}, {})", file, self.span.line, self.span.col),
            None => write!(f, "({}, {})", self.span.line, self.span.col),
        }
    }
}
