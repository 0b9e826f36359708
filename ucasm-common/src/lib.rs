//! Microcode assembler - common types and utilities
//!
//! Shared source locations, the assembler error type and the diagnostic
//! collector used by every stage of the pipeline.

pub mod error;
pub mod source_loc;

pub use error::{AsmError, Diagnostic, DiagnosticKind, ErrorReporter, Severity};
pub use source_loc::SourceLocation;
