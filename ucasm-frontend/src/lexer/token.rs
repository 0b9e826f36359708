//! Token definitions for the assembly lexer

use serde::{Deserialize, Serialize};
use std::fmt;
use ucasm_common::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Identifier(String),
    Integer(i64),
    /// `.name`, stored lower-cased without the dot
    Directive(String),

    Comma,
    Colon,
    Hash,

    Newline,
    EndOfFile,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Identifier(s) => write!(f, "{s}"),
            TokenType::Integer(n) => write!(f, "{n}"),
            TokenType::Directive(s) => write!(f, ".{s}"),
            TokenType::Comma => write!(f, ","),
            TokenType::Colon => write!(f, ":"),
            TokenType::Hash => write!(f, "#"),
            TokenType::Newline => write!(f, "end of line"),
            TokenType::EndOfFile => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: TokenType,
    /// Source text the token was scanned from
    pub lexeme: String,
    pub location: SourceLocation,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            token_type,
            lexeme: lexeme.into(),
            location,
        }
    }

    pub fn is_line_end(&self) -> bool {
        matches!(self.token_type, TokenType::Newline | TokenType::EndOfFile)
    }

    /// How the token reads in a diagnostic
    pub fn describe(&self) -> String {
        match &self.token_type {
            TokenType::Newline | TokenType::EndOfFile => self.token_type.to_string(),
            _ => format!("'{}'", self.lexeme),
        }
    }
}
