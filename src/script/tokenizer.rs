//=============================================
// script/tokenizer.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Lexer for the embedded Script language
// Objective: Produce position-tagged tokens, joining lines inside brackets
//=============================================

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use super::parser::ParseError;

/// Represents the position of a token in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Long(i64),
    Float(f64),
    String(String),
    Identifier(String),

    // Keywords
    Import,
    From,
    As,
    Lambda,
    And,
    Or,
    Not,
    In,
    None,
    True,
    False,
    Raise,
    Pass,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    EqualEqual,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,

    Newline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Long(n) => write!(f, "{}L", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::String(s) => write!(f, "\"{}\"", s),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "end of input"),
            _ => write!(f, "{:?}", self),
        }
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    HashMap::from([
        ("import", TokenKind::Import),
        ("from", TokenKind::From),
        ("as", TokenKind::As),
        ("lambda", TokenKind::Lambda),
        ("and", TokenKind::And),
        ("or", TokenKind::Or),
        ("not", TokenKind::Not),
        ("in", TokenKind::In),
        ("None", TokenKind::None),
        ("True", TokenKind::True),
        ("False", TokenKind::False),
        ("raise", TokenKind::Raise),
        ("pass", TokenKind::Pass),
    ])
});

/// A token with its kind and position information
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }
}

pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    bracket_depth: usize,
    tokens: Vec<Token>,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            bracket_depth: 0,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            let start = self.here();
            match c {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                '\n' => {
                    self.advance();
                    if self.bracket_depth == 0 {
                        self.push(TokenKind::Newline, start);
                    }
                }
                '"' | '\'' => {
                    let text = self.string(c, start)?;
                    self.push(TokenKind::String(text), start);
                }
                c if c.is_ascii_digit() => {
                    let kind = self.number(start)?;
                    self.push(kind, start);
                }
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    let kind = self.number(start)?;
                    self.push(kind, start);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.identifier();
                    let kind = KEYWORDS
                        .get(word.as_str())
                        .cloned()
                        .unwrap_or(TokenKind::Identifier(word));
                    self.push(kind, start);
                }
                _ => {
                    let kind = self.operator(c, start)?;
                    self.push(kind, start);
                }
            }
        }
        if self.bracket_depth > 0 {
            return Err(ParseError::UnexpectedEndOfInput {
                expected: "closing bracket".to_string(),
                position: self.here(),
            });
        }
        let end = self.here();
        self.push(TokenKind::Newline, end);
        self.push(TokenKind::Eof, end);
        Ok(self.tokens)
    }

    fn operator(&mut self, c: char, start: Position) -> Result<TokenKind, ParseError> {
        self.advance();
        let two = |me: &mut Self, next: char, yes: TokenKind, no: TokenKind| {
            if me.peek() == Some(next) {
                me.advance();
                yes
            } else {
                no
            }
        };
        Ok(match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => two(self, '=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => two(self, '=', TokenKind::LessEqual, TokenKind::Less),
            '>' => two(self, '=', TokenKind::GreaterEqual, TokenKind::Greater),
            '!' if self.peek() == Some('=') => {
                self.advance();
                TokenKind::NotEqual
            }
            '(' | '[' => {
                self.bracket_depth += 1;
                if c == '(' {
                    TokenKind::LeftParen
                } else {
                    TokenKind::LeftBracket
                }
            }
            ')' | ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                if c == ')' {
                    TokenKind::RightParen
                } else {
                    TokenKind::RightBracket
                }
            }
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            other => {
                return Err(ParseError::InvalidSyntax {
                    message: format!("unexpected character '{}'", other),
                    position: start,
                });
            }
        })
    }

    fn string(&mut self, quote: char, start: Position) -> Result<String, ParseError> {
        self.advance();
        let mut text = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(ParseError::UnexpectedEndOfInput {
                        expected: "end of string literal".to_string(),
                        position: start,
                    });
                }
                Some(c) if c == quote => return Ok(text),
                Some('\\') => match self.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('\'') => text.push('\''),
                    Some('"') => text.push('"'),
                    Some('0') => text.push('\0'),
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => {
                        return Err(ParseError::UnexpectedEndOfInput {
                            expected: "escape sequence".to_string(),
                            position: start,
                        });
                    }
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn number(&mut self, start: Position) -> Result<TokenKind, ParseError> {
        let mut literal = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    literal.push(c);
                }
            } else if c == '.' && !is_float && self.peek_at(1).is_none_or(|n| n.is_ascii_digit() || !n.is_alphabetic()) {
                is_float = true;
                literal.push(c);
            } else if (c == 'e' || c == 'E') && !literal.contains('e') {
                is_float = true;
                literal.push('e');
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    literal.push(sign);
                    self.advance();
                }
                continue;
            } else {
                break;
            }
            self.advance();
        }
        let invalid = |message: String| ParseError::InvalidSyntax {
            message,
            position: start,
        };
        if is_float {
            return literal
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| invalid(format!("invalid float literal '{}'", literal)));
        }
        let long = matches!(self.peek(), Some('L' | 'l'));
        if long {
            self.advance();
        }
        let value = literal
            .parse::<i64>()
            .map_err(|_| invalid(format!("integer literal '{}' out of range", literal)))?;
        Ok(if long {
            TokenKind::Long(value)
        } else {
            TokenKind::Integer(value)
        })
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn push(&mut self, kind: TokenKind, position: Position) {
        self.tokens.push(Token::new(kind, position));
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Tokenizer::new(source)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn distinguishes_integer_long_and_float() {
        assert_eq!(
            kinds("1 2L 3.5"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Long(2),
                TokenKind::Float(3.5),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let tokens = kinds("f(1,\n2)");
        assert_eq!(
            tokens.iter().filter(|k| **k == TokenKind::Newline).count(),
            1
        );
    }

    #[test]
    fn unclosed_bracket_is_end_of_input() {
        let err = Tokenizer::new("f(1,").tokenize().expect_err("unclosed");
        assert!(matches!(err, ParseError::UnexpectedEndOfInput { .. }));
    }

    #[test]
    fn member_access_on_integer_is_not_a_float() {
        assert_eq!(
            kinds("a.b")[..3],
            [
                TokenKind::Identifier("a".into()),
                TokenKind::Dot,
                TokenKind::Identifier("b".into())
            ]
        );
    }
}
