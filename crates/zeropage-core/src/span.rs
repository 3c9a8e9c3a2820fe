//! Source locations attached to tree nodes, CFG nodes and diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte range in the source file plus the line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: u32, end: u32, line: u32, column: u32) -> Self {
        Span {
            start,
            end,
            line,
            column,
        }
    }

    /// A placeholder span for synthesized nodes.
    pub fn dummy() -> Self {
        Span::default()
    }

    pub fn is_dummy(&self) -> bool {
        *self == Span::default()
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(&self, other: &Span) -> Span {
        if self.is_dummy() {
            return *other;
        }
        if other.is_dummy() {
            return *self;
        }
        let (line, column) = if self.start <= other.start {
            (self.line, self.column)
        } else {
            (other.line, other.column)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
