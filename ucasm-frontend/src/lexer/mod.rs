//! Assembly lexer
//!
//! Turns a source buffer into a line-oriented token stream. Newlines are
//! statement terminators; all other whitespace and comments are skipped.
//! A bad character or literal invalidates only its own line.

pub mod token;

pub use token::{Token, TokenType};

use log::trace;
use ucasm_common::{AsmError, SourceLocation};

#[derive(Debug, Clone)]
pub struct Lexer {
    filename: String,
    input: Vec<char>,
    position: usize,
    line: u32,
    column: u32,
    finished: bool,
}

impl Lexer {
    pub fn new(filename: &str, input: &str) -> Self {
        Self {
            filename: filename.to_string(),
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            finished: false,
        }
    }

    /// Rewind to the start of the buffer
    pub fn reset(&mut self) {
        self.position = 0;
        self.line = 1;
        self.column = 1;
        self.finished = false;
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current_char()?;
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(&self.filename, self.line, self.column)
    }

    /// Skip everything up to (not including) the next newline
    fn skip_to_end_of_line(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Skip a `/* ... */` comment; returns whether it spanned a line break
    fn skip_block_comment(&mut self) -> Result<bool, AsmError> {
        let start = self.current_location();
        self.advance();
        self.advance();
        let mut crossed_line = false;
        loop {
            match self.current_char() {
                None => return Err(AsmError::syntax(start, "'*/'", "end of input")),
                Some('*') if self.peek_char(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(crossed_line);
                }
                Some(ch) => {
                    crossed_line |= ch == '\n';
                    self.advance();
                }
            }
        }
    }

    fn scan_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn tokenize_integer(&mut self, location: SourceLocation) -> Result<Token, AsmError> {
        let negative = self.current_char() == Some('-');
        if negative {
            self.advance();
        }
        let digits = self.scan_word();
        let lexeme = if negative { format!("-{digits}") } else { digits.clone() };

        let (radix, body) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            (16, hex)
        } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
            (2, bin)
        } else {
            (10, digits.as_str())
        };

        let magnitude = i64::from_str_radix(body, radix).map_err(|_| AsmError::InvalidLiteral {
            location: location.clone(),
            literal: lexeme.clone(),
        })?;
        let value = if negative { -magnitude } else { magnitude };

        Ok(Token::new(TokenType::Integer(value), lexeme, location))
    }

    /// Scan the next token
    pub fn next_token(&mut self) -> Result<Token, AsmError> {
        loop {
            match self.current_char() {
                Some(ch) if ch.is_whitespace() && ch != '\n' => {
                    self.advance();
                }
                Some(';') => self.skip_to_end_of_line(),
                Some('/') if self.peek_char(1) == Some('/') => self.skip_to_end_of_line(),
                Some('/') if self.peek_char(1) == Some('*') => {
                    let location = self.current_location();
                    if self.skip_block_comment()? {
                        return Ok(Token::new(TokenType::Newline, "\n", location));
                    }
                }
                _ => break,
            }
        }

        let location = self.current_location();
        let token = match self.current_char() {
            None => Token::new(TokenType::EndOfFile, "", location),
            Some('\n') => {
                self.advance();
                Token::new(TokenType::Newline, "\n", location)
            }
            Some(',') => {
                self.advance();
                Token::new(TokenType::Comma, ",", location)
            }
            Some(':') => {
                self.advance();
                Token::new(TokenType::Colon, ":", location)
            }
            Some('#') => {
                self.advance();
                Token::new(TokenType::Hash, "#", location)
            }
            Some(ch) if ch.is_ascii_digit() => self.tokenize_integer(location)?,
            Some('-') if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.tokenize_integer(location)?
            }
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                let word = self.scan_word();
                Token::new(TokenType::Identifier(word.clone()), word, location)
            }
            Some('.') if self.peek_char(1).is_some_and(|c| c.is_ascii_alphabetic() || c == '_') => {
                self.advance();
                let word = self.scan_word();
                Token::new(TokenType::Directive(word.to_ascii_lowercase()), format!(".{word}"), location)
            }
            Some(ch) => {
                self.advance();
                return Err(AsmError::Lex {
                    location,
                    unexpected: ch,
                });
            }
        };

        trace!("{}: {:?}", token.location, token.token_type);
        Ok(token)
    }

    /// Tokenize the whole buffer, collecting one error per bad line.
    ///
    /// Tokens already produced for a line that fails to lex are dropped, so
    /// later stages never see a half-scanned statement.
    pub fn tokenize(&mut self) -> (Vec<Token>, Vec<AsmError>) {
        let mut tokens: Vec<Token> = Vec::new();
        let mut errors = Vec::new();
        let mut line_start = 0;

        loop {
            match self.next_token() {
                Ok(token) => {
                    let token_type = token.token_type.clone();
                    tokens.push(token);
                    match token_type {
                        TokenType::Newline => line_start = tokens.len(),
                        TokenType::EndOfFile => break,
                        _ => {}
                    }
                }
                Err(err) => {
                    errors.push(err);
                    tokens.truncate(line_start);
                    self.skip_to_end_of_line();
                }
            }
        }

        (tokens, errors)
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, AsmError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.token_type == TokenType::EndOfFile => self.finished = true,
            Err(_) => self.skip_to_end_of_line(),
            Ok(_) => {}
        }
        Some(result)
    }
}
