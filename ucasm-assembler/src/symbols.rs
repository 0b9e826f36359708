//! Symbol table
//!
//! Symbols live in an arena in definition order; a name index points into
//! it. Only the layout pass holds the table mutably.

use serde::Serialize;
use std::collections::HashMap;
use ucasm_common::{AsmError, SourceLocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Code,
    Initvals(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    pub section: Section,
    pub location: SourceLocation,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(
        &mut self,
        name: &str,
        address: u32,
        section: Section,
        location: SourceLocation,
    ) -> Result<(), AsmError> {
        if let Some(&existing) = self.by_name.get(name) {
            return Err(AsmError::DuplicateSymbol {
                name: name.to_string(),
                first: self.symbols[existing].location.clone(),
                second: location,
            });
        }
        self.by_name.insert(name.to_string(), self.symbols.len());
        self.symbols.push(Symbol {
            name: name.to_string(),
            address,
            section,
            location,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// Move every code symbol at or after `from` up by `amount` words
    pub(crate) fn shift_code(&mut self, from: u32, amount: u32) -> Result<(), AsmError> {
        for symbol in &mut self.symbols {
            if symbol.section == Section::Code && symbol.address >= from {
                symbol.address = symbol
                    .address
                    .checked_add(amount)
                    .ok_or_else(|| AsmError::AddressOverflow {
                        location: symbol.location.clone(),
                        item: format!("label '{}'", symbol.name),
                        address: symbol.address,
                        width: amount,
                    })?;
            }
        }
        Ok(())
    }

    /// Symbols in definition order
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
