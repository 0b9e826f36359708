//! Microcode assembler - frontend
//!
//! Lexing, macro expansion and parsing of assembly source into AST nodes.

pub mod ast;
pub mod lexer;
pub mod macros;
pub mod parser;

pub use ast::{Arity, DirectiveArg, DirectiveKind, Node, NodeKind, Operand};
pub use lexer::{Lexer, Token, TokenType};
pub use macros::{MacroDefinition, MacroExpander, MacroInvocation, DEFAULT_MAX_EXPANSION_DEPTH};
pub use parser::{Parser, RegisterLookup};

use ucasm_common::AsmError;

/// Run one source file through lexer, macro expander and parser.
///
/// Lexical errors are collected for the whole file before expansion is
/// attempted; each later stage only runs on error-free input.
pub fn parse_source(
    filename: &str,
    source: &str,
    expander: &mut MacroExpander,
    registers: &dyn RegisterLookup,
) -> Result<Vec<Node>, Vec<AsmError>> {
    let (tokens, errors) = Lexer::new(filename, source).tokenize();
    if !errors.is_empty() {
        return Err(errors);
    }
    let expanded = expander.expand(tokens)?;
    Parser::new(expanded, registers).parse()
}
