//! Binary container formats
//!
//! Framed image layout (all integers big-endian):
//!
//! ```text
//! 0   u8    type tag 'u'
//! 1   u8    header version (1)
//! 2   u16   padding (0)
//! 4   u32   code length in bytes
//! 8   u32   initvals length in bytes
//! 12  u32   CRC-32 of everything after the header
//! 16  ...   code words, then initvals entries of every section
//! ```

use crate::initvals::InitvalsSection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ucasm_common::AsmError;

pub const CODE_TAG: u8 = b'u';
pub const INITVALS_TAG: u8 = b'i';
pub const HEADER_VERSION: u8 = 1;
pub const FRAMED_HEADER_LEN: usize = 16;
pub const INITVALS_HEADER_LEN: usize = 8;
pub const TLV_TERMINATOR: [u8; 8] = [0xFF, 0xFF, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "raw-le32")]
    RawLe32,
    #[serde(rename = "raw-be32")]
    RawBe32,
    #[default]
    #[serde(rename = "framed")]
    Framed,
}

impl OutputFormat {
    /// Raw formats carry only code; initvals go to their own files
    pub fn is_raw(&self) -> bool {
        !matches!(self, OutputFormat::Framed)
    }
}

impl FromStr for OutputFormat {
    type Err = AsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw-le32" | "raw-little-endian-32" => Ok(OutputFormat::RawLe32),
            "raw-be32" | "raw-big-endian-32" => Ok(OutputFormat::RawBe32),
            "framed" => Ok(OutputFormat::Framed),
            _ => Err(AsmError::UnsupportedFormat { format: s.to_string() }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::RawLe32 => write!(f, "raw-le32"),
            OutputFormat::RawBe32 => write!(f, "raw-be32"),
            OutputFormat::Framed => write!(f, "framed"),
        }
    }
}

/// Encoded code words, addressed from `base`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeImage {
    pub base: u32,
    pub words: Vec<u32>,
    pub instruction_count: usize,
}

impl CodeImage {
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }
}

pub fn emit(image: &CodeImage, initvals: &[InitvalsSection], format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::RawLe32 => image.words.iter().flat_map(|w| w.to_le_bytes()).collect(),
        OutputFormat::RawBe32 => image.words.iter().flat_map(|w| w.to_be_bytes()).collect(),
        OutputFormat::Framed => emit_framed(image, initvals),
    }
}

fn emit_framed(image: &CodeImage, initvals: &[InitvalsSection]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(image.byte_len());
    for word in &image.words {
        payload.extend_from_slice(&word.to_be_bytes());
    }
    let code_len = payload.len();
    for entry in initvals.iter().flat_map(|s| &s.entries) {
        entry.encode_raw(&mut payload);
    }
    let initvals_len = payload.len() - code_len;

    let mut out = Vec::with_capacity(FRAMED_HEADER_LEN + payload.len());
    out.push(CODE_TAG);
    out.push(HEADER_VERSION);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(code_len as u32).to_be_bytes());
    out.extend_from_slice(&(initvals_len as u32).to_be_bytes());
    out.extend_from_slice(&crc32_bytes(&payload).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Stand-alone initvals file for one section
pub fn emit_initvals_file(section: &InitvalsSection, tlv: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if tlv {
        for entry in &section.entries {
            entry.encode_tlv(&mut out);
        }
        out.extend_from_slice(&TLV_TERMINATOR);
    } else {
        out.push(INITVALS_TAG);
        out.push(HEADER_VERSION);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(section.entries.len() as u32).to_be_bytes());
        for entry in &section.entries {
            entry.encode_raw(&mut out);
        }
    }
    out
}

pub fn crc32_bytes(bytes: &[u8]) -> u32 {
    crc32_finalize(crc32_update(crc32_init(), bytes))
}

fn crc32_init() -> u32 {
    0xFFFF_FFFFu32
}

fn crc32_update(mut crc: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = if (crc & 1) == 1 { u32::MAX } else { 0 };
            crc = (crc >> 1) ^ (0xEDB8_8320u32 & mask);
        }
    }
    crc
}

fn crc32_finalize(crc: u32) -> u32 {
    !crc
}
