//! Instruction encoder
//!
//! Packs an opcode and resolved operand values into the bit layout an
//! instruction definition declares. Multi-word instructions are emitted
//! least-significant word first.

use crate::isa::{InstructionDef, IsaTable, OperandKind};
use ucasm_common::{AsmError, SourceLocation};

/// Operand value after symbol resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedOperand {
    /// Register encoding from the table
    Register(u64),
    /// A number written in the source
    Literal(i64),
    /// A symbol-derived value, already range checked
    Relocated(i64),
}

impl ResolvedOperand {
    fn kind_name(&self) -> &'static str {
        match self {
            ResolvedOperand::Register(_) => "register",
            ResolvedOperand::Literal(_) => "immediate",
            ResolvedOperand::Relocated(_) => "symbol",
        }
    }
}

pub struct InstructionEncoder<'a> {
    isa: &'a IsaTable,
}

impl<'a> InstructionEncoder<'a> {
    pub fn new(isa: &'a IsaTable) -> Self {
        Self { isa }
    }

    pub fn encode(
        &self,
        mnemonic: &str,
        operands: &[ResolvedOperand],
        location: &SourceLocation,
    ) -> Result<Vec<u32>, AsmError> {
        let def = self.isa.lookup(mnemonic).ok_or_else(|| AsmError::UnknownMnemonic {
            location: location.clone(),
            mnemonic: mnemonic.to_string(),
        })?;
        let bits = self.pack(def, mnemonic, operands, location)?;
        Ok(split_words(bits, self.isa.width_of(def)))
    }

    fn pack(
        &self,
        def: &InstructionDef,
        mnemonic: &str,
        operands: &[ResolvedOperand],
        location: &SourceLocation,
    ) -> Result<u64, AsmError> {
        if operands.len() != def.operands.len() {
            return Err(AsmError::OperandCount {
                location: location.clone(),
                mnemonic: mnemonic.to_string(),
                expected: def.operands.len(),
                found: operands.len(),
            });
        }

        let mismatch = |slot: usize, expected: String, got: String| AsmError::OperandKindMismatch {
            location: location.clone(),
            mnemonic: mnemonic.to_string(),
            slot,
            expected,
            got,
        };

        let mut bits = def.opcode << def.opcode_shift;
        for (index, (slot, operand)) in def.operands.iter().zip(operands).enumerate() {
            let mask = slot.value_mask();
            let field = match (slot.kind, *operand) {
                (OperandKind::Register, ResolvedOperand::Register(encoding)) => {
                    if encoding > mask {
                        return Err(mismatch(
                            index,
                            format!("register encodable in {} bits", slot.width),
                            format!("encoding {encoding:#x}"),
                        ));
                    }
                    encoding
                }
                (OperandKind::Register, other) => {
                    return Err(mismatch(index, "register".to_string(), other.kind_name().to_string()));
                }
                (kind, ResolvedOperand::Register(_)) => {
                    return Err(mismatch(index, kind.name().to_string(), "register".to_string()));
                }
                (_, ResolvedOperand::Literal(value)) => {
                    let (min, max) = slot.range();
                    if value < min || value > max {
                        return Err(AsmError::ImmediateOverflow {
                            location: location.clone(),
                            value,
                            min,
                            max,
                        });
                    }
                    (value as u64) & mask
                }
                (_, ResolvedOperand::Relocated(value)) => (value as u64) & mask,
            };
            bits |= (field | slot.tag) << slot.shift;
        }
        Ok(bits)
    }
}

fn split_words(bits: u64, width: u32) -> Vec<u32> {
    (0..width).map(|i| (bits >> (32 * i)) as u32).collect()
}
