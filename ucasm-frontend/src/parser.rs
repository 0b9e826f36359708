//! Line-oriented parser for expanded assembly tokens
//!
//! Each line is: zero or more `label:` definitions, then optionally one
//! directive or one instruction. Operand counts and kinds are not checked
//! here; the encoder does that against the instruction table. A malformed
//! line yields exactly one error and parsing resumes on the next line.

use crate::ast::{DirectiveArg, DirectiveKind, Node, NodeKind, Operand};
use crate::lexer::{Token, TokenType};
use log::debug;
use std::collections::VecDeque;
use ucasm_common::{AsmError, SourceLocation};

/// Tells the parser which identifiers name registers
pub trait RegisterLookup {
    fn is_register(&self, name: &str) -> bool;
}

pub struct Parser<'a> {
    tokens: VecDeque<Token>,
    registers: &'a dyn RegisterLookup,
    end_location: SourceLocation,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, registers: &'a dyn RegisterLookup) -> Self {
        let end_location = tokens
            .last()
            .map(|t| t.location.clone())
            .unwrap_or_else(SourceLocation::builtin);
        Self {
            tokens: tokens.into(),
            registers,
            end_location,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.front()
    }

    fn peek_type(&self, offset: usize) -> Option<&TokenType> {
        self.tokens.get(offset).map(|t| &t.token_type)
    }

    fn advance(&mut self) -> Option<Token> {
        self.tokens.pop_front()
    }

    fn at_line_end(&self) -> bool {
        self.peek().map_or(true, Token::is_line_end)
    }

    fn current_location(&self) -> SourceLocation {
        self.peek()
            .map(|t| t.location.clone())
            .unwrap_or_else(|| self.end_location.clone())
    }

    fn unexpected(&self, expected: &str) -> AsmError {
        let found = self.peek().map_or_else(|| "end of input".to_string(), Token::describe);
        AsmError::syntax(self.current_location(), expected, found)
    }

    fn check(&self, token_type: &TokenType) -> bool {
        self.peek_type(0) == Some(token_type)
    }

    /// Drop the rest of the current line, including its newline
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            match token.token_type {
                TokenType::Newline => {
                    self.advance();
                    return;
                }
                TokenType::EndOfFile => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Parse every line. All malformed lines are reported.
    pub fn parse(mut self) -> Result<Vec<Node>, Vec<AsmError>> {
        let mut nodes = Vec::new();
        let mut errors = Vec::new();

        while !matches!(self.peek_type(0), None | Some(TokenType::EndOfFile)) {
            let mut line_nodes = Vec::new();
            match self.parse_line(&mut line_nodes) {
                Ok(()) => {
                    nodes.extend(line_nodes);
                    if self.check(&TokenType::Newline) {
                        self.advance();
                    }
                }
                Err(err) => {
                    errors.push(err);
                    self.synchronize();
                }
            }
        }

        debug!("parsed {} node(s), {} error(s)", nodes.len(), errors.len());
        if errors.is_empty() {
            Ok(nodes)
        } else {
            Err(errors)
        }
    }

    fn parse_line(&mut self, nodes: &mut Vec<Node>) -> Result<(), AsmError> {
        while matches!(
            (self.peek_type(0), self.peek_type(1)),
            (Some(TokenType::Identifier(_)), Some(TokenType::Colon))
        ) {
            if let Some(token) = self.advance() {
                if let TokenType::Identifier(name) = token.token_type {
                    nodes.push(Node::new(NodeKind::Label(name), token.location));
                }
            }
            self.advance();
        }

        if self.at_line_end() {
            return Ok(());
        }

        let node = match self.peek_type(0) {
            Some(TokenType::Directive(_)) => self.parse_directive()?,
            Some(TokenType::Identifier(_)) => self.parse_instruction()?,
            _ => return Err(self.unexpected("label, directive or instruction")),
        };
        nodes.push(node);

        if !self.at_line_end() {
            return Err(self.unexpected("end of line"));
        }
        Ok(())
    }

    /// Comma-separated list up to the end of the line
    fn parse_list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, AsmError>) -> Result<Vec<T>, AsmError> {
        let mut items = Vec::new();
        if self.at_line_end() {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.check(&TokenType::Comma) {
                self.advance();
            } else {
                return Ok(items);
            }
        }
    }

    fn parse_directive(&mut self) -> Result<Node, AsmError> {
        let token = self.advance().ok_or_else(|| self.unexpected("directive"))?;
        let TokenType::Directive(name) = &token.token_type else {
            return Err(AsmError::syntax(token.location.clone(), "directive", token.describe()));
        };
        let kind = DirectiveKind::from_name(name)
            .ok_or_else(|| AsmError::directive(token.location.clone(), format!("unknown directive '{}'", token.lexeme)))?;

        let args = self.parse_list(Self::parse_directive_arg)?;
        let arity = kind.arity();
        if !arity.accepts(args.len()) {
            return Err(AsmError::directive(
                token.location,
                format!("{} takes {} argument(s), found {}", kind, arity, args.len()),
            ));
        }

        Ok(Node::new(NodeKind::Directive { kind, args }, token.location))
    }

    fn parse_directive_arg(&mut self) -> Result<DirectiveArg, AsmError> {
        if self.check(&TokenType::Hash) {
            self.advance();
        }
        let arg = match self.peek_type(0) {
            Some(TokenType::Integer(value)) => DirectiveArg::Integer(*value),
            Some(TokenType::Identifier(name)) => DirectiveArg::Name(name.clone()),
            _ => return Err(self.unexpected("directive argument")),
        };
        self.advance();
        Ok(arg)
    }

    fn parse_instruction(&mut self) -> Result<Node, AsmError> {
        let token = self.advance().ok_or_else(|| self.unexpected("instruction"))?;
        let TokenType::Identifier(mnemonic) = token.token_type else {
            return Err(AsmError::syntax(token.location, "instruction", token.lexeme));
        };
        let operands = self.parse_list(Self::parse_operand)?;
        Ok(Node::new(NodeKind::Instruction { mnemonic, operands }, token.location))
    }

    fn parse_operand(&mut self) -> Result<Operand, AsmError> {
        let hashed = self.check(&TokenType::Hash);
        if hashed {
            self.advance();
        }
        let operand = match self.peek_type(0) {
            Some(TokenType::Integer(value)) => Operand::Immediate(*value),
            Some(TokenType::Identifier(name)) if !hashed && self.registers.is_register(name) => {
                Operand::Register(name.clone())
            }
            Some(TokenType::Identifier(name)) => Operand::Symbol(name.clone()),
            _ => return Err(self.unexpected("operand")),
        };
        self.advance();
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    struct RPrefix;

    impl RegisterLookup for RPrefix {
        fn is_register(&self, name: &str) -> bool {
            name.strip_prefix('r').is_some_and(|n| n.parse::<u8>().is_ok())
        }
    }

    fn parse(source: &str) -> Result<Vec<Node>, Vec<AsmError>> {
        let (tokens, errors) = Lexer::new("p.asm", source).tokenize();
        assert!(errors.is_empty());
        Parser::new(tokens, &RPrefix).parse()
    }

    fn kinds(source: &str) -> Vec<NodeKind> {
        parse(source).unwrap().into_iter().map(|n| n.kind).collect()
    }

    #[test]
    fn test_label_and_instruction() {
        assert_eq!(
            kinds("start: ADD r1, r2, #4\n BEQ start\n"),
            vec![
                NodeKind::Label("start".to_string()),
                NodeKind::Instruction {
                    mnemonic: "ADD".to_string(),
                    operands: vec![
                        Operand::Register("r1".to_string()),
                        Operand::Register("r2".to_string()),
                        Operand::Immediate(4),
                    ],
                },
                NodeKind::Instruction {
                    mnemonic: "BEQ".to_string(),
                    operands: vec![Operand::Symbol("start".to_string())],
                },
            ]
        );
    }

    #[test]
    fn test_operand_forms() {
        assert_eq!(
            kinds("mov 0x1f, #target, r7, r99x\n"),
            vec![NodeKind::Instruction {
                mnemonic: "mov".to_string(),
                operands: vec![
                    Operand::Immediate(0x1f),
                    Operand::Symbol("target".to_string()),
                    Operand::Register("r7".to_string()),
                    Operand::Symbol("r99x".to_string()),
                ],
            }]
        );
    }

    #[test]
    fn test_multiple_labels_on_one_line() {
        let nodes = parse("a: b: nop").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].kind, NodeKind::Label("b".to_string()));
        assert_eq!(nodes[1].location, SourceLocation::new("p.asm", 1, 4));
    }

    #[test]
    fn test_directives() {
        let source = indoc! {"
            .initvals b0g0
            .shm32 0xDEADBEEF, 0x0001, 0x0010
            .word 1, entry
        "};
        assert_eq!(
            kinds(source),
            vec![
                NodeKind::Directive {
                    kind: DirectiveKind::Initvals,
                    args: vec![DirectiveArg::Name("b0g0".to_string())],
                },
                NodeKind::Directive {
                    kind: DirectiveKind::Shm32,
                    args: vec![
                        DirectiveArg::Integer(0xDEADBEEF),
                        DirectiveArg::Integer(1),
                        DirectiveArg::Integer(0x10),
                    ],
                },
                NodeKind::Directive {
                    kind: DirectiveKind::Word,
                    args: vec![DirectiveArg::Integer(1), DirectiveArg::Name("entry".to_string())],
                },
            ]
        );
    }

    #[test]
    fn test_directive_argument_count() {
        let errors = parse(".mmio16 1\n.text extra\n").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, AsmError::Directive { .. })));
    }

    #[test]
    fn test_unknown_directive() {
        let errors = parse(".bogus 1\n").unwrap_err();
        assert!(matches!(&errors[..], [AsmError::Directive { message, .. }] if message.contains(".bogus")));
    }

    #[test]
    fn test_one_error_per_line_and_recovery() {
        let source = indoc! {"
            add r1,, r2
            nop
            , r3
            mov r1 r2
            jmp end
        "};
        let errors = parse(source).unwrap_err();
        assert_eq!(
            errors,
            vec![
                AsmError::syntax(SourceLocation::new("p.asm", 1, 8), "operand", "','"),
                AsmError::syntax(SourceLocation::new("p.asm", 3, 1), "label, directive or instruction", "','"),
                AsmError::syntax(SourceLocation::new("p.asm", 4, 8), "end of line", "'r2'"),
            ]
        );
    }

    #[test]
    fn test_trailing_comma_is_an_error() {
        let errors = parse("add r1, r2,\n").unwrap_err();
        assert_eq!(
            errors,
            vec![AsmError::syntax(SourceLocation::new("p.asm", 1, 12), "operand", "end of line")]
        );
    }
}
