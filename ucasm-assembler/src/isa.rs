//! Instruction-definition tables
//!
//! The opcode map, register names and bit layout of a chip revision are
//! data, loaded from JSON and validated once. The rest of the assembler only
//! asks the table questions: does this mnemonic exist, how wide is it, where
//! do its fields go.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use ucasm_common::AsmError;
use ucasm_frontend::RegisterLookup;

const DEMO_TABLE: &str = include_str!("../tables/demo.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Register,
    Immediate,
    /// A code address
    Absolute,
    /// A PC-relative code offset
    Relative,
}

impl OperandKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperandKind::Register => "register",
            OperandKind::Immediate => "immediate",
            OperandKind::Absolute => "absolute address",
            OperandKind::Relative => "relative offset",
        }
    }
}

/// Address a relative operand is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelativeBase {
    #[serde(rename = "self")]
    Instruction,
    #[default]
    #[serde(rename = "next")]
    NextInstruction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperandSlot {
    pub kind: OperandKind,
    pub shift: u32,
    pub width: u32,
    /// Only meaningful for immediates; relative slots are always signed
    #[serde(default)]
    pub signed: bool,
    /// Constant bits OR-ed into the field, in field coordinates
    #[serde(default)]
    pub tag: u64,
}

impl OperandSlot {
    pub fn is_signed(&self) -> bool {
        match self.kind {
            OperandKind::Relative => true,
            OperandKind::Immediate => self.signed,
            OperandKind::Register | OperandKind::Absolute => false,
        }
    }

    /// Inclusive value range the field can hold
    pub fn range(&self) -> (i64, i64) {
        field_range(self.width, self.is_signed())
    }

    pub fn value_mask(&self) -> u64 {
        (1u64 << self.width) - 1
    }

    /// Bits the field occupies in the instruction, tag included
    fn field_mask(&self) -> u64 {
        (self.value_mask() | self.tag) << self.shift
    }
}

pub fn field_range(width: u32, signed: bool) -> (i64, i64) {
    if signed {
        (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
    } else {
        (0, (1i64 << width) - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstructionDef {
    pub mnemonic: String,
    pub opcode: u64,
    pub opcode_shift: u32,
    /// Width in 32-bit words; falls back to the table default
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub relative_to: RelativeBase,
    /// Transfers control (branch, jump, call)
    #[serde(default)]
    pub jump: bool,
    /// Misbehaves when placed directly after a jump
    #[serde(default)]
    pub hazard_after_jump: bool,
    pub operands: Vec<OperandSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterClass {
    pub prefix: String,
    pub count: u32,
    /// Encoding of register 0 in the class
    #[serde(default)]
    pub base: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedRegister {
    pub name: String,
    pub encoding: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSet {
    #[serde(default)]
    pub classes: Vec<RegisterClass>,
    #[serde(default)]
    pub named: Vec<NamedRegister>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsaTable {
    pub name: String,
    /// Default instruction width in 32-bit words
    pub instruction_width: u32,
    #[serde(default)]
    pub registers: RegisterSet,
    /// Mnemonic used for the implicit jump to the `.start` label
    #[serde(default)]
    pub start_jump: Option<String>,
    /// Capacity of the instruction memory, in instructions
    #[serde(default)]
    pub max_instructions: Option<usize>,
    pub instructions: Vec<InstructionDef>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl IsaTable {
    pub fn from_json(json: &str) -> Result<Self, AsmError> {
        let table: IsaTable = serde_json::from_str(json).map_err(|e| AsmError::IsaTable {
            message: e.to_string(),
        })?;
        table.finish()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, AsmError> {
        let table: IsaTable = serde_json::from_value(value).map_err(|e| AsmError::IsaTable {
            message: e.to_string(),
        })?;
        table.finish()
    }

    pub fn from_file(path: &Path) -> Result<Self, AsmError> {
        let json = std::fs::read_to_string(path).map_err(|e| AsmError::Io {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Tables compiled into the assembler
    pub fn builtin(name: &str) -> Option<Result<Self, AsmError>> {
        match name {
            "demo" => Some(Self::from_json(DEMO_TABLE)),
            _ => None,
        }
    }

    fn finish(mut self) -> Result<Self, AsmError> {
        self.validate()?;
        self.index = self
            .instructions
            .iter()
            .enumerate()
            .map(|(i, def)| (def.mnemonic.to_ascii_lowercase(), i))
            .collect();
        debug!(
            "loaded instruction table '{}' ({} instructions)",
            self.name,
            self.instructions.len()
        );
        Ok(self)
    }

    fn validate(&self) -> Result<(), AsmError> {
        let fail = |message: String| {
            Err(AsmError::IsaTable {
                message: format!("table '{}': {}", self.name, message),
            })
        };

        if !(1..=2).contains(&self.instruction_width) {
            return fail(format!("instruction width {} must be 1 or 2 words", self.instruction_width));
        }

        let mut seen: HashMap<String, &str> = HashMap::new();
        for def in &self.instructions {
            let key = def.mnemonic.to_ascii_lowercase();
            if let Some(previous) = seen.insert(key, &def.mnemonic) {
                return fail(format!("mnemonic '{}' defined twice (also as '{}')", def.mnemonic, previous));
            }

            let width = self.width_of(def);
            if !(1..=2).contains(&width) {
                return fail(format!("'{}': width {} must be 1 or 2 words", def.mnemonic, width));
            }
            let bits = width * 32;
            let opcode_bits = 64 - def.opcode.leading_zeros();
            if def.opcode_shift >= bits || def.opcode_shift + opcode_bits > bits {
                return fail(format!("'{}': opcode does not fit in {} bits", def.mnemonic, bits));
            }

            let mut used = 0u64;
            for (slot_index, slot) in def.operands.iter().enumerate() {
                let tag_bits = 64 - slot.tag.leading_zeros();
                if slot.width == 0 || slot.width > 32 || slot.shift >= bits || slot.shift + slot.width.max(tag_bits) > bits {
                    return fail(format!(
                        "'{}': operand {} (width {}, shift {}) does not fit in {} bits",
                        def.mnemonic, slot_index, slot.width, slot.shift, bits
                    ));
                }
                if slot.tag & slot.value_mask() != 0 {
                    return fail(format!("'{}': operand {} tag overlaps its value bits", def.mnemonic, slot_index));
                }
                let mask = slot.field_mask();
                if used & mask != 0 {
                    return fail(format!("'{}': operand {} overlaps another operand", def.mnemonic, slot_index));
                }
                used |= mask;
            }
        }

        for class in &self.registers.classes {
            if class.prefix.is_empty() {
                return fail("register class with an empty prefix".to_string());
            }
            if class.count > 0 && class.base.checked_add(u64::from(class.count - 1)).is_none() {
                return fail(format!(
                    "register class '{}': base {:#x} plus {} registers overflows",
                    class.prefix, class.base, class.count
                ));
            }
        }

        if let Some(jump) = &self.start_jump {
            let Some(def) = self.instructions.iter().find(|d| d.mnemonic.eq_ignore_ascii_case(jump)) else {
                return fail(format!("start jump '{jump}' is not a defined instruction"));
            };
            let takes_target = matches!(
                def.operands.as_slice(),
                [slot] if matches!(slot.kind, OperandKind::Absolute | OperandKind::Relative)
            );
            if !takes_target {
                return fail(format!("start jump '{jump}' must take exactly one address operand"));
            }
        }

        Ok(())
    }

    /// Case-insensitive mnemonic lookup
    pub fn lookup(&self, mnemonic: &str) -> Option<&InstructionDef> {
        self.index
            .get(&mnemonic.to_ascii_lowercase())
            .map(|&i| &self.instructions[i])
    }

    /// Width of an instruction in words
    pub fn width_of(&self, def: &InstructionDef) -> u32 {
        def.width.unwrap_or(self.instruction_width)
    }

    pub fn register_encoding(&self, name: &str) -> Option<u64> {
        let lower = name.to_ascii_lowercase();
        if let Some(named) = self.registers.named.iter().find(|r| r.name.eq_ignore_ascii_case(&lower)) {
            return Some(named.encoding);
        }
        self.registers.classes.iter().find_map(|class| {
            let digits = lower.strip_prefix(&class.prefix.to_ascii_lowercase())?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let number: u32 = digits.parse().ok()?;
            if number >= class.count {
                return None;
            }
            class.base.checked_add(u64::from(number))
        })
    }
}

impl RegisterLookup for IsaTable {
    fn is_register(&self, name: &str) -> bool {
        self.register_encoding(name).is_some()
    }
}
