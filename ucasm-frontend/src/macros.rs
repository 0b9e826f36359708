//! Macro expansion over the token stream
//!
//! ```text
//! .macro load_imm reg, value
//!     or value, r0, reg
//! .endm
//! ```
//!
//! Definitions are removed from the stream. Each invocation is replaced by
//! the body with formal parameters substituted positionally, and the result
//! is expanded again so bodies may use other macros. Every expanded token
//! carries the location of the invocation.

use crate::lexer::{Token, TokenType};
use log::{debug, trace};
use std::collections::HashMap;
use ucasm_common::{AsmError, SourceLocation};

pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 100;

#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub params: Vec<String>,
    /// Body lines without their terminating newline
    pub body: Vec<Vec<Token>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct MacroInvocation {
    pub name: String,
    pub args: Vec<Vec<Token>>,
    pub location: SourceLocation,
}

pub struct MacroExpander {
    macros: HashMap<String, MacroDefinition>,
    max_expansion_depth: usize,
}

impl MacroExpander {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_EXPANSION_DEPTH)
    }

    pub fn with_max_depth(max_expansion_depth: usize) -> Self {
        Self {
            macros: HashMap::new(),
            max_expansion_depth,
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Expand one token stream. Definitions stay registered, so a later
    /// stream of the same assembly unit can invoke them.
    pub fn expand(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, Vec<AsmError>> {
        let mut output = Vec::with_capacity(tokens.len());
        let mut errors = Vec::new();
        let mut open: Option<MacroDefinition> = None;

        let (lines, eof) = split_lines(tokens);
        for (line, terminator) in lines {
            let first = line.first().map(|t| &t.token_type);
            let is_directive = |name: &str| matches!(first, Some(TokenType::Directive(d)) if d == name);

            if let Some(definition) = open.as_mut() {
                if is_directive("endm") {
                    if let Some(definition) = open.take() {
                        self.define(definition, &mut errors);
                    }
                } else if is_directive("macro") {
                    errors.push(AsmError::macro_definition(
                        line[0].location.clone(),
                        format!("nested macro definition inside '{}'", definition.name),
                    ));
                } else {
                    definition.body.push(line);
                }
                continue;
            }

            if is_directive("macro") {
                match parse_header(&line) {
                    Ok(definition) => open = Some(definition),
                    Err(err) => errors.push(err),
                }
                continue;
            }
            if is_directive("endm") {
                errors.push(AsmError::macro_definition(
                    line[0].location.clone(),
                    "'.endm' without matching '.macro'",
                ));
                continue;
            }

            if let Err(err) = self.expand_line(line, 0, &mut output) {
                errors.push(err);
            }
            if let Some(terminator) = terminator {
                output.push(terminator);
            }
        }

        if let Some(definition) = open {
            errors.push(AsmError::macro_definition(
                definition.location,
                format!("macro '{}' is missing '.endm'", definition.name),
            ));
        }
        output.push(eof);

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }

    fn define(&mut self, definition: MacroDefinition, errors: &mut Vec<AsmError>) {
        if let Some(existing) = self.macros.get(&definition.name) {
            errors.push(AsmError::macro_definition(
                definition.location,
                format!("macro '{}' already defined at {}", definition.name, existing.location),
            ));
            return;
        }
        debug!(
            "defined macro '{}' ({} parameter(s), {} line(s))",
            definition.name,
            definition.params.len(),
            definition.body.len()
        );
        self.macros.insert(definition.name.clone(), definition);
    }

    /// Find an invocation in `line`: optional `label:` prefixes, then a
    /// defined macro name. Returns the prefix length and the invocation.
    fn find_invocation(&self, line: &[Token]) -> Result<Option<(usize, MacroInvocation)>, AsmError> {
        let mut index = 0;
        while let (Some(TokenType::Identifier(_)), Some(TokenType::Colon)) = (
            line.get(index).map(|t| &t.token_type),
            line.get(index + 1).map(|t| &t.token_type),
        ) {
            index += 2;
        }

        let Some(head) = line.get(index) else {
            return Ok(None);
        };
        let TokenType::Identifier(name) = &head.token_type else {
            return Ok(None);
        };
        if !self.macros.contains_key(name) {
            return Ok(None);
        }

        let mut args: Vec<Vec<Token>> = Vec::new();
        let rest = &line[index + 1..];
        if !rest.is_empty() {
            for group in rest.split(|t| t.token_type == TokenType::Comma) {
                if group.is_empty() {
                    return Err(AsmError::syntax(head.location.clone(), "macro argument", "','"));
                }
                args.push(group.to_vec());
            }
        }

        Ok(Some((
            index,
            MacroInvocation {
                name: name.clone(),
                args,
                location: head.location.clone(),
            },
        )))
    }

    fn expand_line(&self, line: Vec<Token>, depth: usize, output: &mut Vec<Token>) -> Result<(), AsmError> {
        let Some((prefix_len, invocation)) = self.find_invocation(&line)? else {
            output.extend(line);
            return Ok(());
        };

        let definition = self.macros.get(&invocation.name).ok_or_else(|| AsmError::Internal {
            message: format!("macro '{}' vanished during expansion", invocation.name),
        })?;

        if depth >= self.max_expansion_depth {
            return Err(AsmError::MacroRecursion {
                location: invocation.location,
                name: invocation.name,
                depth: depth + 1,
            });
        }
        if invocation.args.len() != definition.params.len() {
            return Err(AsmError::MacroArity {
                location: invocation.location,
                name: invocation.name,
                expected: definition.params.len(),
                found: invocation.args.len(),
            });
        }
        trace!("expanding '{}' at {} (depth {})", invocation.name, invocation.location, depth + 1);

        // Labels in front of the invocation get a line of their own
        if prefix_len > 0 {
            output.extend(line[..prefix_len].iter().cloned());
            output.push(Token::new(TokenType::Newline, "\n", invocation.location.clone()));
        }

        for body_line in &definition.body {
            let substituted = substitute(body_line, &definition.params, &invocation);
            self.expand_line(substituted, depth + 1, output)?;
            output.push(Token::new(TokenType::Newline, "\n", invocation.location.clone()));
        }
        Ok(())
    }
}

impl Default for MacroExpander {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a token stream into lines; each line carries its newline token
/// (absent for the last line) and the final end-of-file token is returned
/// separately.
fn split_lines(tokens: Vec<Token>) -> (Vec<(Vec<Token>, Option<Token>)>, Token) {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut eof = None;

    for token in tokens {
        match token.token_type {
            TokenType::Newline => lines.push((std::mem::take(&mut current), Some(token))),
            TokenType::EndOfFile => {
                eof = Some(token);
                break;
            }
            _ => current.push(token),
        }
    }
    if !current.is_empty() {
        lines.push((current, None));
    }

    let eof = eof.unwrap_or_else(|| Token::new(TokenType::EndOfFile, "", SourceLocation::builtin()));
    (lines, eof)
}

fn parse_header(line: &[Token]) -> Result<MacroDefinition, AsmError> {
    let location = line[0].location.clone();
    let name = match line.get(1).map(|t| &t.token_type) {
        Some(TokenType::Identifier(name)) => name.clone(),
        Some(_) => return Err(AsmError::syntax(line[1].location.clone(), "macro name", line[1].describe())),
        None => return Err(AsmError::syntax(location, "macro name", "end of line")),
    };

    let mut params: Vec<String> = Vec::new();
    let mut rest = line[2..].iter().peekable();
    while let Some(token) = rest.next() {
        let TokenType::Identifier(param) = &token.token_type else {
            return Err(AsmError::syntax(token.location.clone(), "parameter name", token.describe()));
        };
        if params.contains(param) {
            return Err(AsmError::macro_definition(
                token.location.clone(),
                format!("parameter '{param}' repeated in macro '{name}'"),
            ));
        }
        params.push(param.clone());

        if let Some(separator) = rest.next() {
            if separator.token_type != TokenType::Comma || rest.peek().is_none() {
                return Err(AsmError::syntax(separator.location.clone(), "','", separator.describe()));
            }
        }
    }

    Ok(MacroDefinition {
        name,
        params,
        body: Vec::new(),
        location,
    })
}

fn substitute(body_line: &[Token], params: &[String], invocation: &MacroInvocation) -> Vec<Token> {
    let mut line = Vec::with_capacity(body_line.len());
    for token in body_line {
        let position = match &token.token_type {
            TokenType::Identifier(name) => params.iter().position(|p| p == name),
            _ => None,
        };
        match position {
            Some(index) => line.extend(invocation.args[index].iter().map(|arg| restamp(arg, &invocation.location))),
            None => line.push(restamp(token, &invocation.location)),
        }
    }
    line
}

fn restamp(token: &Token, location: &SourceLocation) -> Token {
    Token::new(token.token_type.clone(), token.lexeme.clone(), location.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn lex(source: &str) -> Vec<Token> {
        let (tokens, errors) = Lexer::new("m.asm", source).tokenize();
        assert!(errors.is_empty());
        tokens
    }

    /// Render expanded tokens back into one string per non-empty line
    fn render(tokens: &[Token]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current: Vec<String> = Vec::new();
        for token in tokens {
            if token.is_line_end() {
                if !current.is_empty() {
                    lines.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(token.lexeme.clone());
            }
        }
        lines
    }

    fn expand(source: &str) -> Result<Vec<Token>, Vec<AsmError>> {
        MacroExpander::new().expand(lex(source))
    }

    #[test]
    fn test_positional_substitution() {
        let source = indoc! {"
            .macro addi dst, value
                add dst, dst, #value
            .endm
            addi r3, 0x10
        "};
        let tokens = expand(source).unwrap();
        assert_eq!(render(&tokens), vec!["add r3 , r3 , # 0x10"]);
    }

    #[test]
    fn test_expanded_tokens_carry_invocation_location() {
        let source = indoc! {"
            .macro twice
                nop
                nop
            .endm
            here: twice
        "};
        let tokens = expand(source).unwrap();
        assert_eq!(render(&tokens), vec!["here :", "nop", "nop"]);
        for token in tokens.iter().filter(|t| t.lexeme == "nop") {
            assert_eq!(token.location, SourceLocation::new("m.asm", 5, 7));
        }
    }

    #[test]
    fn test_nested_invocation() {
        let source = indoc! {"
            .macro inner r
                mov r, r0
            .endm
            .macro outer a, b
                inner a
                inner b
            .endm
            outer r1, r2
        "};
        let tokens = expand(source).unwrap();
        assert_eq!(render(&tokens), vec!["mov r1 , r0", "mov r2 , r0"]);
    }

    #[test]
    fn test_wrong_argument_count() {
        let source = indoc! {"
            .macro pair a, b
                add a, b, a
            .endm
            pair r1
        "};
        let errors = expand(source).unwrap_err();
        assert!(matches!(
            &errors[..],
            [AsmError::MacroArity { name, expected: 2, found: 1, .. }] if name == "pair"
        ));
    }

    #[test]
    fn test_self_recursion_hits_depth_limit() {
        let source = indoc! {"
            .macro forever
                forever
            .endm
            forever
        "};
        let errors = MacroExpander::with_max_depth(8).expand(lex(source)).unwrap_err();
        assert!(matches!(
            &errors[..],
            [AsmError::MacroRecursion { name, depth: 9, .. }] if name == "forever"
        ));
    }

    #[test]
    fn test_default_depth_limit() {
        let source = indoc! {"
            .macro a
                b
            .endm
            .macro b
                a
            .endm
            a
        "};
        let errors = expand(source).unwrap_err();
        assert!(matches!(&errors[..], [AsmError::MacroRecursion { depth: 101, .. }]));
    }

    #[test]
    fn test_definition_errors() {
        let errors = expand(".endm\n.macro open\nnop\n").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], AsmError::MacroDefinition { location, .. } if location.line == 1));
        assert!(matches!(&errors[1], AsmError::MacroDefinition { message, .. } if message.contains("missing")));
    }

    #[test]
    fn test_redefinition_is_rejected() {
        let source = indoc! {"
            .macro m
            .endm
            .macro m
            .endm
        "};
        let errors = expand(source).unwrap_err();
        assert!(matches!(&errors[..], [AsmError::MacroDefinition { message, .. }] if message.contains("already defined")));
    }

    #[test]
    fn test_definitions_persist_across_streams() {
        let mut expander = MacroExpander::new();
        expander.expand(lex(".macro halt\n jmp halt_loop\n.endm\n")).unwrap();
        assert!(expander.is_defined("halt"));

        let tokens = expander.expand(lex("halt\n")).unwrap();
        assert_eq!(render(&tokens), vec!["jmp halt_loop"]);
    }

    #[test]
    fn test_no_macro_syntax_remains() {
        let source = indoc! {"
            .macro m x
                nop x
            .endm
            m 1
            nop
        "};
        let tokens = expand(source).unwrap();
        assert!(tokens
            .iter()
            .all(|t| !matches!(&t.token_type, TokenType::Directive(d) if d == "macro" || d == "endm")));
        assert_eq!(render(&tokens), vec!["nop 1", "nop"]);
    }
}
