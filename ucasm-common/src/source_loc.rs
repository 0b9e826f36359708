//! Source location tracking for diagnostics

use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in a source file (line and column are 1-based)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(filename: &str, line: u32, column: u32) -> Self {
        Self {
            filename: filename.to_string(),
            line,
            column,
        }
    }

    /// Location for items the assembler synthesizes itself (e.g. the start jump)
    pub fn builtin() -> Self {
        Self::new("<builtin>", 0, 0)
    }

    /// Same file and line, different column
    pub fn with_column(&self, column: u32) -> Self {
        Self {
            filename: self.filename.clone(),
            line: self.line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}
