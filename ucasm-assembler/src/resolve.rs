//! Second pass: relocation and encoding
//!
//! Every relocation site is resolved against the finished symbol table,
//! then every code item is encoded in address order. The symbol table is
//! only borrowed here.

use crate::emitter::CodeImage;
use crate::encoder::{InstructionEncoder, ResolvedOperand};
use crate::isa::{IsaTable, OperandKind, RelativeBase};
use crate::layout::{CodeItem, ItemKind, Layout, RelocationSite, WordValue};
use crate::symbols::SymbolTable;
use log::{debug, trace};
use std::collections::HashMap;
use ucasm_common::{AsmError, ErrorReporter};
use ucasm_frontend::Operand;

pub struct Resolver<'a> {
    isa: &'a IsaTable,
    symbols: &'a SymbolTable,
}

impl<'a> Resolver<'a> {
    pub fn new(isa: &'a IsaTable, symbols: &'a SymbolTable) -> Self {
        Self { isa, symbols }
    }

    /// Final value of one relocation site
    pub fn discharge(&self, site: &RelocationSite, item: &CodeItem) -> Result<i64, AsmError> {
        let symbol = self.symbols.lookup(&site.symbol).ok_or_else(|| AsmError::UndefinedSymbol {
            name: site.symbol.clone(),
            location: site.location.clone(),
        })?;
        let address = i64::from(symbol.address);

        let ItemKind::Instruction { mnemonic, .. } = &item.kind else {
            return Ok(address);
        };
        // Unknown mnemonics and bad operand shapes are the encoder's to report
        let Some((def, slot)) = self
            .isa
            .lookup(mnemonic)
            .and_then(|def| def.operands.get(site.slot).map(|slot| (def, slot)))
        else {
            return Ok(address);
        };

        let value = match slot.kind {
            OperandKind::Register => return Ok(address),
            OperandKind::Absolute | OperandKind::Immediate => address,
            OperandKind::Relative => {
                let base = match def.relative_to {
                    RelativeBase::Instruction => i64::from(item.address),
                    RelativeBase::NextInstruction => i64::from(item.address) + i64::from(item.width),
                };
                address - base
            }
        };

        let (min, max) = slot.range();
        if value < min || value > max {
            return Err(AsmError::RelocationOverflow {
                location: site.location.clone(),
                symbol: site.symbol.clone(),
                value,
                min,
                max,
            });
        }
        trace!("{} -> {} at {}", site.symbol, value, site.location);
        Ok(value)
    }

    /// Resolve and encode the whole layout. Errors go to `reporter`; the
    /// returned image is only meaningful when none were reported.
    pub fn resolve(&self, layout: &Layout, reporter: &mut ErrorReporter) -> CodeImage {
        let mut values: HashMap<(usize, usize), i64> = HashMap::new();
        for site in &layout.relocations {
            let Some(item) = layout.items.get(site.item) else {
                reporter.report(AsmError::Internal {
                    message: format!("relocation for '{}' points past the last item", site.symbol),
                });
                continue;
            };
            match self.discharge(site, item) {
                Ok(value) => {
                    values.insert((site.item, site.slot), value);
                }
                Err(err) => reporter.report(err),
            }
        }

        let encoder = InstructionEncoder::new(self.isa);
        let mut words = Vec::new();
        for (index, item) in layout.items.iter().enumerate() {
            match &item.kind {
                ItemKind::Instruction { mnemonic, operands } => {
                    let resolved: Option<Vec<ResolvedOperand>> = operands
                        .iter()
                        .enumerate()
                        .map(|(slot, operand)| self.resolve_operand(operand, values.get(&(index, slot)).copied()))
                        .collect();
                    let encoded = match resolved {
                        Some(resolved) => encoder.encode(mnemonic, &resolved, &item.location),
                        None => Ok(Vec::new()),
                    };
                    match encoded {
                        Ok(encoded) if encoded.len() == item.width as usize => {
                            debug!("{:04x}: {}  {}", item.address, hex_words(&encoded), listing(mnemonic, operands));
                            words.extend(encoded);
                        }
                        Ok(encoded) => {
                            reporter.report(AsmError::Internal {
                                message: format!(
                                    "'{}' at {} encoded to {} word(s) but was laid out as {}",
                                    mnemonic,
                                    item.location,
                                    encoded.len(),
                                    item.width
                                ),
                            });
                            words.extend(std::iter::repeat(0).take(item.width as usize));
                        }
                        Err(err) => {
                            reporter.report(err);
                            words.extend(std::iter::repeat(0).take(item.width as usize));
                        }
                    }
                }
                ItemKind::Words(data) => {
                    for (slot, value) in data.iter().enumerate() {
                        let word = match value {
                            WordValue::Literal(word) => *word,
                            WordValue::Symbol(_) => values.get(&(index, slot)).map_or(0, |&v| v as u32),
                        };
                        words.push(word);
                    }
                    trace!("{:04x}: {} data word(s)", item.address, data.len());
                }
            }
        }

        CodeImage {
            base: layout.code_base,
            words,
            instruction_count: layout.instruction_count(),
        }
    }

    /// `None` when the operand is a symbol whose site failed to resolve
    fn resolve_operand(&self, operand: &Operand, relocated: Option<i64>) -> Option<ResolvedOperand> {
        match operand {
            Operand::Register(name) => self.isa.register_encoding(name).map(ResolvedOperand::Register),
            Operand::Immediate(value) => Some(ResolvedOperand::Literal(*value)),
            Operand::Symbol(_) => relocated.map(ResolvedOperand::Relocated),
        }
    }
}

fn hex_words(words: &[u32]) -> String {
    words.iter().map(|w| format!("{w:08x}")).collect::<Vec<_>>().join(" ")
}

fn listing(mnemonic: &str, operands: &[Operand]) -> String {
    let operands: Vec<String> = operands.iter().map(ToString::to_string).collect();
    format!("{} {}", mnemonic, operands.join(", "))
}
