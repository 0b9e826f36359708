//! Initvals builder
//!
//! Initvals are register writes the driver performs before starting the
//! microcode. Indirect targets (PHY, radio, shared memory, template RAM)
//! expand into several plain MMIO writes through their access windows.

use serde::Serialize;
use std::collections::HashMap;
use ucasm_common::{AsmError, SourceLocation};
use ucasm_frontend::DirectiveKind;

/// Largest offset an entry can address; bit 15 flags 32-bit entries
pub const OFFSET_MASK: u16 = 0x7FFF;
pub const FLAG_32BIT: u16 = 0x8000;

const PHY_ADDRESS: u16 = 0x3FC;
const PHY_DATA: u16 = 0x3FE;
const RADIO_ADDRESS: u16 = 0x3F6;
const RADIO_DATA: u16 = 0x3FA;
const SHM_CONTROL: u16 = 0x160;
const SHM_DATA: u16 = 0x164;
const SHM_DATA_UNALIGNED: u16 = 0x166;
const TRAM_ADDRESS: u16 = 0x130;
const TRAM_DATA: u16 = 0x134;

/// Routing value selecting the byte-addressed shared memory
const ROUTING_SHARED: u32 = 0x01;
const MAX_ROUTING: u32 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InitvalSize {
    Bits16,
    Bits32,
}

impl InitvalSize {
    pub fn bytes(&self) -> u16 {
        match self {
            InitvalSize::Bits16 => 2,
            InitvalSize::Bits32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitvalEntry {
    pub offset: u16,
    pub size: InitvalSize,
    pub value: u32,
}

impl InitvalEntry {
    pub fn mmio16(offset: u16, value: u16) -> Self {
        Self {
            offset,
            size: InitvalSize::Bits16,
            value: u32::from(value),
        }
    }

    pub fn mmio32(offset: u16, value: u32) -> Self {
        Self {
            offset,
            size: InitvalSize::Bits32,
            value,
        }
    }

    /// `be16 offset|flags` followed by a be16 or be32 value
    pub fn encode_raw(&self, out: &mut Vec<u8>) {
        match self.size {
            InitvalSize::Bits16 => {
                out.extend_from_slice(&self.offset.to_be_bytes());
                out.extend_from_slice(&(self.value as u16).to_be_bytes());
            }
            InitvalSize::Bits32 => {
                out.extend_from_slice(&(self.offset | FLAG_32BIT).to_be_bytes());
                out.extend_from_slice(&self.value.to_be_bytes());
            }
        }
    }

    pub fn raw_len(&self) -> usize {
        2 + usize::from(self.size.bytes())
    }

    /// `le16 offset`, `le16 size`, `le32 value`
    pub fn encode_tlv(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.bytes().to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitvalsSection {
    pub name: String,
    pub entries: Vec<InitvalEntry>,
    pub location: SourceLocation,
}

impl InitvalsSection {
    pub fn raw_len(&self) -> usize {
        self.entries.iter().map(InitvalEntry::raw_len).sum()
    }
}

#[derive(Debug, Default)]
pub struct InitvalsBuilder {
    sections: Vec<InitvalsSection>,
    by_name: HashMap<String, usize>,
}

impl InitvalsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Section index for `name`, created on first use
    pub fn select(&mut self, name: &str, location: &SourceLocation) -> usize {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }
        let index = self.sections.len();
        self.sections.push(InitvalsSection {
            name: name.to_string(),
            entries: Vec::new(),
            location: location.clone(),
        });
        self.by_name.insert(name.to_string(), index);
        index
    }

    pub fn section(&self, index: usize) -> Option<&InitvalsSection> {
        self.sections.get(index)
    }

    pub fn entry_count(&self, index: usize) -> usize {
        self.sections.get(index).map_or(0, |s| s.entries.len())
    }

    /// Append the writes for one initvals directive; returns how many
    /// entries it produced. Nothing is appended on error.
    pub fn write(
        &mut self,
        index: usize,
        kind: DirectiveKind,
        args: &[i64],
        location: &SourceLocation,
    ) -> Result<usize, AsmError> {
        let entries = expand(kind, args, location)?;
        let section = self.sections.get_mut(index).ok_or_else(|| AsmError::Internal {
            message: format!("initvals section {index} does not exist"),
        })?;
        let count = entries.len();
        section.entries.extend(entries);
        Ok(count)
    }

    pub fn finish(self) -> Vec<InitvalsSection> {
        self.sections
    }
}

fn check(value: i64, bits: u32, what: &str, location: &SourceLocation) -> Result<u32, AsmError> {
    let max = (1i64 << bits) - 1;
    if (0..=max).contains(&value) {
        Ok(value as u32)
    } else {
        Err(AsmError::directive(
            location.clone(),
            format!("{what} {value:#x} does not fit in {bits} bits"),
        ))
    }
}

fn check_offset(value: i64, location: &SourceLocation) -> Result<u16, AsmError> {
    if (0..=i64::from(OFFSET_MASK)).contains(&value) {
        Ok(value as u16)
    } else {
        Err(AsmError::directive(
            location.clone(),
            format!("initval offset {value:#x} too big, must be <= {OFFSET_MASK:#06x}"),
        ))
    }
}

fn not_a_write(kind: DirectiveKind, args: &[i64]) -> AsmError {
    AsmError::Internal {
        message: format!("{kind} is not an initvals write with {} argument(s)", args.len()),
    }
}

fn shm_control(routing: u32, offset: u32) -> InitvalEntry {
    InitvalEntry::mmio32(SHM_CONTROL, ((routing & 0xFFFF) << 16) | (offset & 0xFFFF))
}

fn expand(kind: DirectiveKind, args: &[i64], location: &SourceLocation) -> Result<Vec<InitvalEntry>, AsmError> {
    if !kind.is_initval() || !kind.arity().accepts(args.len()) {
        return Err(not_a_write(kind, args));
    }

    let entries = match kind {
        DirectiveKind::Mmio16 => {
            let value = check(args[0], 16, "value", location)?;
            vec![InitvalEntry::mmio16(check_offset(args[1], location)?, value as u16)]
        }
        DirectiveKind::Mmio32 => {
            let value = check(args[0], 32, "value", location)?;
            vec![InitvalEntry::mmio32(check_offset(args[1], location)?, value)]
        }
        DirectiveKind::Phy | DirectiveKind::Radio => {
            let value = check(args[0], 16, "value", location)? as u16;
            let offset = check(args[1], 16, "register", location)? as u16;
            let (address, data) = if kind == DirectiveKind::Phy {
                (PHY_ADDRESS, PHY_DATA)
            } else {
                (RADIO_ADDRESS, RADIO_DATA)
            };
            vec![InitvalEntry::mmio16(address, offset), InitvalEntry::mmio16(data, value)]
        }
        DirectiveKind::Shm16 | DirectiveKind::Shm32 => {
            let wide = kind == DirectiveKind::Shm32;
            let value = check(args[0], if wide { 32 } else { 16 }, "value", location)?;
            let routing = check(args[1], 16, "routing", location)?;
            let offset = check(args[2], 16, "offset", location)?;
            if routing & 0xFF > MAX_ROUTING {
                return Err(AsmError::directive(
                    location.clone(),
                    format!("invalid shared memory routing {routing:#x}"),
                ));
            }
            shm_write(routing, offset, value, wide)
        }
        DirectiveKind::Tram => {
            let value = check(args[0], 32, "value", location)?;
            let offset = check(args[1], 32, "offset", location)?;
            vec![
                InitvalEntry::mmio32(TRAM_ADDRESS, offset),
                InitvalEntry::mmio32(TRAM_DATA, value),
            ]
        }
        _ => return Err(not_a_write(kind, args)),
    };
    Ok(entries)
}

fn shm_write(routing: u32, offset: u32, value: u32, wide: bool) -> Vec<InitvalEntry> {
    let mut offset = offset;
    if routing & 0xFF == ROUTING_SHARED {
        // Shared memory is byte addressed but accessed in 32-bit units
        if offset & 0x3 != 0 {
            let word = offset >> 2;
            return if wide {
                vec![
                    shm_control(routing, word),
                    InitvalEntry::mmio16(SHM_DATA_UNALIGNED, (value >> 16) as u16),
                    shm_control(routing, word + 1),
                    InitvalEntry::mmio16(SHM_DATA, value as u16),
                ]
            } else {
                vec![
                    shm_control(routing, word),
                    InitvalEntry::mmio16(SHM_DATA_UNALIGNED, value as u16),
                ]
            };
        }
        offset >>= 2;
    }

    let data = if wide {
        InitvalEntry::mmio32(SHM_DATA, value)
    } else {
        InitvalEntry::mmio16(SHM_DATA, value as u16)
    };
    vec![shm_control(routing, offset), data]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at() -> SourceLocation {
        SourceLocation::new("iv.asm", 1, 1)
    }

    fn entries(kind: DirectiveKind, args: &[i64]) -> Vec<InitvalEntry> {
        let mut builder = InitvalsBuilder::new();
        let index = builder.select("b0g0", &at());
        builder.write(index, kind, args, &at()).unwrap();
        builder.finish().remove(0).entries
    }

    #[test]
    fn test_mmio() {
        assert_eq!(entries(DirectiveKind::Mmio16, &[0xBEEF, 0x120]), vec![InitvalEntry::mmio16(0x120, 0xBEEF)]);
        assert_eq!(
            entries(DirectiveKind::Mmio32, &[0xDEADBEEF, 0x7FFF]),
            vec![InitvalEntry::mmio32(0x7FFF, 0xDEADBEEF)]
        );
    }

    #[test]
    fn test_phy_and_radio_use_address_data_pairs() {
        assert_eq!(
            entries(DirectiveKind::Phy, &[0x1234, 0x0A5]),
            vec![InitvalEntry::mmio16(0x3FC, 0x0A5), InitvalEntry::mmio16(0x3FE, 0x1234)]
        );
        assert_eq!(
            entries(DirectiveKind::Radio, &[0x0042, 0x0011]),
            vec![InitvalEntry::mmio16(0x3F6, 0x0011), InitvalEntry::mmio16(0x3FA, 0x0042)]
        );
    }

    #[test]
    fn test_shm_aligned_shared_memory_uses_word_offset() {
        assert_eq!(
            entries(DirectiveKind::Shm32, &[0xCAFEBABE, 0x0001, 0x0010]),
            vec![InitvalEntry::mmio32(0x160, 0x0001_0004), InitvalEntry::mmio32(0x164, 0xCAFEBABE)]
        );
    }

    #[test]
    fn test_shm_other_routing_keeps_offset() {
        assert_eq!(
            entries(DirectiveKind::Shm16, &[0xABCD, 0x0002, 0x0010]),
            vec![InitvalEntry::mmio32(0x160, 0x0002_0010), InitvalEntry::mmio16(0x164, 0xABCD)]
        );
    }

    #[test]
    fn test_shm_unaligned_writes() {
        assert_eq!(
            entries(DirectiveKind::Shm16, &[0x5566, 0x0001, 0x0006]),
            vec![InitvalEntry::mmio32(0x160, 0x0001_0001), InitvalEntry::mmio16(0x166, 0x5566)]
        );
        assert_eq!(
            entries(DirectiveKind::Shm32, &[0x11223344, 0x0001, 0x0006]),
            vec![
                InitvalEntry::mmio32(0x160, 0x0001_0001),
                InitvalEntry::mmio16(0x166, 0x1122),
                InitvalEntry::mmio32(0x160, 0x0001_0002),
                InitvalEntry::mmio16(0x164, 0x3344),
            ]
        );
    }

    #[test]
    fn test_tram() {
        assert_eq!(
            entries(DirectiveKind::Tram, &[0x0BAD_F00D, 0x20]),
            vec![InitvalEntry::mmio32(0x130, 0x20), InitvalEntry::mmio32(0x134, 0x0BAD_F00D)]
        );
    }

    #[test]
    fn test_range_errors_append_nothing() {
        let mut builder = InitvalsBuilder::new();
        let index = builder.select("s", &at());
        for (kind, args) in [
            (DirectiveKind::Mmio16, vec![0x1_0000, 0]),
            (DirectiveKind::Mmio32, vec![1, 0x8000]),
            (DirectiveKind::Mmio16, vec![-1, 0]),
            (DirectiveKind::Shm16, vec![0, 0x05, 0]),
        ] {
            let err = builder.write(index, kind, &args, &at()).unwrap_err();
            assert!(matches!(err, AsmError::Directive { .. }), "{kind}: {err}");
        }
        assert_eq!(builder.entry_count(index), 0);
    }

    #[test]
    fn test_select_reuses_sections() {
        let mut builder = InitvalsBuilder::new();
        let a = builder.select("a", &at());
        let b = builder.select("b", &at());
        assert_eq!(builder.select("a", &at()), a);
        assert_ne!(a, b);
        assert_eq!(builder.finish().len(), 2);
    }

    #[test]
    fn test_raw_and_tlv_encoding() {
        let mut raw = Vec::new();
        InitvalEntry::mmio16(0x0120, 0xBEEF).encode_raw(&mut raw);
        InitvalEntry::mmio32(0x0160, 0x0001_0004).encode_raw(&mut raw);
        assert_eq!(raw, vec![0x01, 0x20, 0xBE, 0xEF, 0x81, 0x60, 0x00, 0x01, 0x00, 0x04]);

        let mut tlv = Vec::new();
        InitvalEntry::mmio16(0x0120, 0xBEEF).encode_tlv(&mut tlv);
        assert_eq!(tlv, vec![0x20, 0x01, 0x02, 0x00, 0xEF, 0xBE, 0x00, 0x00]);
    }
}
