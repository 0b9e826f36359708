//! Error handling for the microcode assembler
//!
//! `AsmError` is the single error type shared by every stage. Stages that
//! keep going after a failure collect errors into an `ErrorReporter`, which
//! turns them into serializable `Diagnostic`s for the driver.

use crate::source_loc::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsmError {
    #[error("Lexical error at {location}: unexpected character '{unexpected}'")]
    Lex {
        location: SourceLocation,
        unexpected: char,
    },

    #[error("Lexical error at {location}: invalid literal '{literal}'")]
    InvalidLiteral {
        location: SourceLocation,
        literal: String,
    },

    #[error("Macro error at {location}: expansion of '{name}' exceeds nesting depth {depth}")]
    MacroRecursion {
        location: SourceLocation,
        name: String,
        depth: usize,
    },

    #[error("Macro error at {location}: '{name}' expects {expected} argument(s), found {found}")]
    MacroArity {
        location: SourceLocation,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Macro error at {location}: {message}")]
    MacroDefinition {
        location: SourceLocation,
        message: String,
    },

    #[error("Syntax error at {location}: expected {expected}, found {found}")]
    Syntax {
        location: SourceLocation,
        expected: String,
        found: String,
    },

    #[error("Directive error at {location}: {message}")]
    Directive {
        location: SourceLocation,
        message: String,
    },

    #[error("Duplicate symbol '{name}' at {second} (first defined at {first})")]
    DuplicateSymbol {
        name: String,
        first: SourceLocation,
        second: SourceLocation,
    },

    #[error("Undefined symbol '{name}' referenced at {location}")]
    UndefinedSymbol {
        name: String,
        location: SourceLocation,
    },

    #[error("Relocation overflow at {location}: '{symbol}' resolves to {value}, outside [{min}, {max}]")]
    RelocationOverflow {
        location: SourceLocation,
        symbol: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Immediate overflow at {location}: {value} outside [{min}, {max}]")]
    ImmediateOverflow {
        location: SourceLocation,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Address overflow at {location}: {item} at {address:#x} ({width} word(s)) runs past the end of the address space")]
    AddressOverflow {
        location: SourceLocation,
        item: String,
        address: u32,
        width: u32,
    },

    #[error("Unknown mnemonic '{mnemonic}' at {location}")]
    UnknownMnemonic {
        location: SourceLocation,
        mnemonic: String,
    },

    #[error("Operand error at {location}: '{mnemonic}' operand {slot} expects {expected}, got {got}")]
    OperandKindMismatch {
        location: SourceLocation,
        mnemonic: String,
        slot: usize,
        expected: String,
        got: String,
    },

    #[error("Operand error at {location}: '{mnemonic}' expects {expected} operand(s), found {found}")]
    OperandCount {
        location: SourceLocation,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported output format '{format}'")]
    UnsupportedFormat { format: String },

    #[error("Instruction table error: {message}")]
    IsaTable { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Internal assembler error: {message}")]
    Internal { message: String },
}

impl AsmError {
    pub fn syntax(location: SourceLocation, expected: impl Into<String>, found: impl Into<String>) -> Self {
        AsmError::Syntax {
            location,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn directive(location: SourceLocation, message: impl Into<String>) -> Self {
        AsmError::Directive {
            location,
            message: message.into(),
        }
    }

    pub fn macro_definition(location: SourceLocation, message: impl Into<String>) -> Self {
        AsmError::MacroDefinition {
            location,
            message: message.into(),
        }
    }

    /// Where the error was detected, if it is tied to a source position
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            AsmError::Lex { location, .. }
            | AsmError::InvalidLiteral { location, .. }
            | AsmError::MacroRecursion { location, .. }
            | AsmError::MacroArity { location, .. }
            | AsmError::MacroDefinition { location, .. }
            | AsmError::Syntax { location, .. }
            | AsmError::Directive { location, .. }
            | AsmError::UndefinedSymbol { location, .. }
            | AsmError::RelocationOverflow { location, .. }
            | AsmError::ImmediateOverflow { location, .. }
            | AsmError::AddressOverflow { location, .. }
            | AsmError::UnknownMnemonic { location, .. }
            | AsmError::OperandKindMismatch { location, .. }
            | AsmError::OperandCount { location, .. } => Some(location),
            AsmError::DuplicateSymbol { second, .. } => Some(second),
            AsmError::UnsupportedFormat { .. }
            | AsmError::IsaTable { .. }
            | AsmError::Io { .. }
            | AsmError::Internal { .. } => None,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            AsmError::Lex { .. } | AsmError::InvalidLiteral { .. } => DiagnosticKind::Lexical,
            AsmError::MacroRecursion { .. }
            | AsmError::MacroArity { .. }
            | AsmError::MacroDefinition { .. } => DiagnosticKind::Macro,
            AsmError::Syntax { .. } => DiagnosticKind::Syntax,
            AsmError::Directive { .. } => DiagnosticKind::Directive,
            AsmError::DuplicateSymbol { .. } => DiagnosticKind::DuplicateSymbol,
            AsmError::UndefinedSymbol { .. } => DiagnosticKind::UndefinedSymbol,
            AsmError::RelocationOverflow { .. } => DiagnosticKind::RelocationOverflow,
            AsmError::ImmediateOverflow { .. } => DiagnosticKind::ImmediateOverflow,
            AsmError::AddressOverflow { .. } => DiagnosticKind::AddressOverflow,
            AsmError::UnknownMnemonic { .. } => DiagnosticKind::UnknownMnemonic,
            AsmError::OperandKindMismatch { .. } => DiagnosticKind::OperandKindMismatch,
            AsmError::OperandCount { .. } => DiagnosticKind::OperandCount,
            AsmError::UnsupportedFormat { .. } => DiagnosticKind::UnsupportedFormat,
            AsmError::IsaTable { .. } => DiagnosticKind::IsaTable,
            AsmError::Io { .. } => DiagnosticKind::Io,
            AsmError::Internal { .. } => DiagnosticKind::Internal,
        }
    }
}

impl From<std::io::Error> for AsmError {
    fn from(err: std::io::Error) -> Self {
        AsmError::Io {
            message: err.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Machine-readable classification of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Lexical,
    Macro,
    Syntax,
    Directive,
    DuplicateSymbol,
    UndefinedSymbol,
    RelocationOverflow,
    ImmediateOverflow,
    AddressOverflow,
    UnknownMnemonic,
    OperandKindMismatch,
    OperandCount,
    UnsupportedFormat,
    IsaTable,
    Io,
    Internal,
    /// An instruction that misbehaves when placed right after a jump
    Hazard,
    SizeLimit,
}

/// A diagnostic message with location and severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub location: Option<SourceLocation>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, location: Option<SourceLocation>, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            location,
            message,
        }
    }
}

impl From<&AsmError> for Diagnostic {
    fn from(err: &AsmError) -> Self {
        Self {
            severity: Severity::Error,
            kind: err.kind(),
            location: err.location().cloned(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Collects errors and warnings across stages so a run reports all of them
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
    errors: Vec<AsmError>,
    warning_count: usize,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn report(&mut self, err: AsmError) {
        self.diagnostics.push(Diagnostic::from(&err));
        self.errors.push(err);
    }

    /// Record a warning that does not stop the pipeline
    pub fn warning(&mut self, kind: DiagnosticKind, location: Option<SourceLocation>, message: String) {
        self.diagnostics.push(Diagnostic::warning(kind, location, message));
        self.warning_count += 1;
    }

    pub fn extend<I: IntoIterator<Item = AsmError>>(&mut self, errors: I) {
        for err in errors {
            self.report(err);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn errors(&self) -> &[AsmError] {
        &self.errors
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_parts(self) -> (Vec<AsmError>, Vec<Diagnostic>) {
        (self.errors, self.diagnostics)
    }

    pub fn summary(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match (self.error_count(), self.warning_count) {
            (0, 0) => "No errors or warnings".to_string(),
            (0, w) => format!("{} warning{}", w, plural(w)),
            (e, 0) => format!("{} error{}", e, plural(e)),
            (e, w) => format!("{} error{} and {} warning{}", e, plural(e), w, plural(w)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("t.asm", line, 1)
    }

    #[test]
    fn test_error_display_includes_location() {
        let err = AsmError::UndefinedSymbol {
            name: "loop".to_string(),
            location: loc(4),
        };
        assert_eq!(err.to_string(), "Undefined symbol 'loop' referenced at t.asm:4:1");
    }

    #[test]
    fn test_duplicate_reports_second_definition() {
        let err = AsmError::DuplicateSymbol {
            name: "x".to_string(),
            first: loc(1),
            second: loc(9),
        };
        assert_eq!(err.location(), Some(&loc(9)));
        assert_eq!(err.kind(), DiagnosticKind::DuplicateSymbol);
    }

    #[test]
    fn test_reporter_counts_and_summary() {
        let mut reporter = ErrorReporter::new();
        assert_eq!(reporter.summary(), "No errors or warnings");

        reporter.report(AsmError::syntax(loc(2), "operand", "','"));
        reporter.warning(DiagnosticKind::Hazard, Some(loc(3)), "ret after jump".to_string());
        reporter.report(AsmError::Lex {
            location: loc(5),
            unexpected: '$',
        });

        assert!(reporter.has_errors());
        assert_eq!(reporter.error_count(), 2);
        assert_eq!(reporter.warning_count(), 1);
        assert_eq!(reporter.diagnostics().len(), 3);
        assert_eq!(reporter.summary(), "2 errors and 1 warning");
    }

    #[test]
    fn test_diagnostic_serializes_kind_and_severity() {
        let diag = Diagnostic::from(&AsmError::UnsupportedFormat {
            format: "elf".to_string(),
        });
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["kind"], "unsupported_format");
        assert!(json["location"].is_null());
    }
}
