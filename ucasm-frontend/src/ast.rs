//! Syntax tree for one assembly source unit

use serde::{Deserialize, Serialize};
use std::fmt;
use ucasm_common::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(String),
    Immediate(i64),
    /// A label reference, resolved in the second pass
    Symbol(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(name) => write!(f, "{name}"),
            Operand::Immediate(value) => write!(f, "#{value}"),
            Operand::Symbol(name) => write!(f, "{name}"),
        }
    }
}

/// Number of arguments a directive accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveKind {
    Text,
    Initvals,
    Space,
    Word,
    Start,
    Arch,
    Mmio16,
    Mmio32,
    Phy,
    Radio,
    Shm16,
    Shm32,
    Tram,
}

impl DirectiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "text" | "code" => DirectiveKind::Text,
            "initvals" => DirectiveKind::Initvals,
            "space" => DirectiveKind::Space,
            "word" => DirectiveKind::Word,
            "start" => DirectiveKind::Start,
            "arch" => DirectiveKind::Arch,
            "mmio16" => DirectiveKind::Mmio16,
            "mmio32" => DirectiveKind::Mmio32,
            "phy" => DirectiveKind::Phy,
            "radio" => DirectiveKind::Radio,
            "shm16" => DirectiveKind::Shm16,
            "shm32" => DirectiveKind::Shm32,
            "tram" => DirectiveKind::Tram,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::Text => "text",
            DirectiveKind::Initvals => "initvals",
            DirectiveKind::Space => "space",
            DirectiveKind::Word => "word",
            DirectiveKind::Start => "start",
            DirectiveKind::Arch => "arch",
            DirectiveKind::Mmio16 => "mmio16",
            DirectiveKind::Mmio32 => "mmio32",
            DirectiveKind::Phy => "phy",
            DirectiveKind::Radio => "radio",
            DirectiveKind::Shm16 => "shm16",
            DirectiveKind::Shm32 => "shm32",
            DirectiveKind::Tram => "tram",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            DirectiveKind::Text => Arity::Exactly(0),
            DirectiveKind::Initvals
            | DirectiveKind::Space
            | DirectiveKind::Start
            | DirectiveKind::Arch => Arity::Exactly(1),
            DirectiveKind::Word => Arity::AtLeast(1),
            DirectiveKind::Mmio16
            | DirectiveKind::Mmio32
            | DirectiveKind::Phy
            | DirectiveKind::Radio
            | DirectiveKind::Tram => Arity::Exactly(2),
            DirectiveKind::Shm16 | DirectiveKind::Shm32 => Arity::Exactly(3),
        }
    }

    /// Directives that add entries to an initvals section
    pub fn is_initval(&self) -> bool {
        matches!(
            self,
            DirectiveKind::Mmio16
                | DirectiveKind::Mmio32
                | DirectiveKind::Phy
                | DirectiveKind::Radio
                | DirectiveKind::Shm16
                | DirectiveKind::Shm32
                | DirectiveKind::Tram
        )
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveArg {
    Integer(i64),
    Name(String),
}

impl fmt::Display for DirectiveArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveArg::Integer(value) => write!(f, "{value}"),
            DirectiveArg::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Label(String),
    Instruction {
        mnemonic: String,
        operands: Vec<Operand>,
    },
    Directive {
        kind: DirectiveKind,
        args: Vec<DirectiveArg>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub location: SourceLocation,
}

impl Node {
    pub fn new(kind: NodeKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}
