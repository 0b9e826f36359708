//! Microcode assembler - core
//!
//! Two-pass assembly against a pluggable instruction table: layout assigns
//! addresses and records relocation sites, resolution encodes every item,
//! and the emitter wraps the result in one of the container formats.

pub mod assembler;
pub mod config;
pub mod emitter;
pub mod encoder;
pub mod initvals;
pub mod isa;
pub mod layout;
pub mod resolve;
pub mod symbols;

pub use assembler::{Assembler, AssemblyFailure, AssemblyOutput, SourceFile};
pub use config::Configuration;
pub use emitter::{CodeImage, OutputFormat};
pub use initvals::{InitvalEntry, InitvalSize, InitvalsSection};
pub use isa::{InstructionDef, IsaTable, OperandKind, OperandSlot, RelativeBase};
pub use symbols::{Section, Symbol, SymbolTable};
