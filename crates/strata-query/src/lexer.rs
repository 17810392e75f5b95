//! Hand-rolled scanner with the lookahead surface the parser needs.
//!
//! The whole input is tokenized eagerly; the parser then drives a cursor
//! with one-token lookahead plus an independent peek cursor for the fixed
//! lookahead sequences that disambiguate the grammar.

use crate::error::QueryError;
use crate::token::{Token, TokenKind};

pub struct Lexer {
    tokens: Vec<Token>,
    source_len: usize,
    /// Index of the next token `move_next` will consume.
    cursor: usize,
    /// Offset of the peek cursor past `cursor + 1`.
    peek_offset: usize,
    /// Index of the most recently consumed token, if any.
    consumed: Option<usize>,
}

impl Lexer {
    pub fn new(source: &str) -> Result<Self, QueryError> {
        Ok(Lexer {
            tokens: scan(source)?,
            source_len: source.len(),
            cursor: 0,
            peek_offset: 0,
            consumed: None,
        })
    }

    /// The next token to be consumed, without consuming it.
    pub fn lookahead(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    /// Consume the next token. Returns false at end of input.
    pub fn move_next(&mut self) -> bool {
        if self.cursor < self.tokens.len() {
            self.consumed = Some(self.cursor);
            self.cursor += 1;
            self.peek_offset = 0;
            true
        } else {
            false
        }
    }

    /// The most recently consumed token.
    pub fn token(&self) -> Option<&Token> {
        self.consumed.and_then(|i| self.tokens.get(i))
    }

    /// The token after the lookahead, without disturbing any cursor.
    pub fn glimpse(&self) -> Option<&Token> {
        self.tokens.get(self.cursor + 1)
    }

    /// Advance the peek cursor one token and return what it passed over.
    /// The first call returns the same token as `glimpse`.
    pub fn peek(&mut self) -> Option<&Token> {
        let index = self.cursor + 1 + self.peek_offset;
        if index < self.tokens.len() {
            self.peek_offset += 1;
            self.tokens.get(index)
        } else {
            None
        }
    }

    pub fn reset_peek(&mut self) {
        self.peek_offset = 0;
    }

    /// Rewind the main cursor to an absolute token index.
    pub fn reset_position(&mut self, position: usize) {
        self.cursor = position;
        self.peek_offset = 0;
        self.consumed = if position > 0 { Some(position - 1) } else { None };
    }

    /// Current absolute token index, for `reset_position`.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_next(&self, kind: TokenKind) -> bool {
        self.lookahead().map(|t| t.kind == kind).unwrap_or(false)
    }

    /// Byte offset of the lookahead, or end of input. Token values do not
    /// retain quoting or escapes, so end of input is the source length, not
    /// a length derived from the last token.
    pub fn offset(&self) -> usize {
        match self.lookahead() {
            Some(t) => t.position,
            None => self.source_len,
        }
    }
}

fn scan(source: &str) -> Result<Vec<Token>, QueryError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            let word = &source[start..i];
            let kind = TokenKind::keyword(word).unwrap_or(TokenKind::Identifier);
            tokens.push(Token {
                kind,
                value: word.to_string(),
                position: start,
            });
            continue;
        }

        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            let mut kind = TokenKind::IntegerLiteral;
            if i + 1 < bytes.len()
                && bytes[i] == b'.'
                && (bytes[i + 1] as char).is_ascii_digit()
            {
                kind = TokenKind::FloatLiteral;
                i += 1;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
            }
            tokens.push(Token {
                kind,
                value: source[start..i].to_string(),
                position: start,
            });
            continue;
        }

        match c {
            '\'' => {
                // single-quoted string, '' escapes a quote; content is
                // arbitrary UTF-8, so copy it as whole segments between
                // quote bytes (a quote byte never occurs inside a
                // multi-byte sequence)
                i += 1;
                let mut value = String::new();
                let mut segment = i;
                let mut closed = false;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        value.push_str(&source[segment..i]);
                        if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                            value.push('\'');
                            i += 2;
                            segment = i;
                        } else {
                            i += 1;
                            closed = true;
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                if !closed {
                    return Err(QueryError::Syntax {
                        expected: "closing quote".to_string(),
                        got: "end of string".to_string(),
                        position: start,
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::StringLiteral,
                    value,
                    position: start,
                });
            }
            '?' | ':' => {
                i += 1;
                let body_start = i;
                if c == '?' {
                    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                        i += 1;
                    }
                } else {
                    while i < bytes.len()
                        && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                    {
                        i += 1;
                    }
                }
                if i == body_start {
                    return Err(QueryError::Syntax {
                        expected: "parameter name or position".to_string(),
                        got: c.to_string(),
                        position: start,
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::InputParameter,
                    value: source[start..i].to_string(),
                    position: start,
                });
            }
            '<' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    i += 2;
                    tokens.push(punct(TokenKind::LessOrEqual, "<=", start));
                } else if i + 1 < bytes.len() && bytes[i + 1] == b'>' {
                    i += 2;
                    tokens.push(punct(TokenKind::NotEqual, "<>", start));
                } else {
                    i += 1;
                    tokens.push(punct(TokenKind::LessThan, "<", start));
                }
            }
            '>' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    i += 2;
                    tokens.push(punct(TokenKind::GreaterOrEqual, ">=", start));
                } else {
                    i += 1;
                    tokens.push(punct(TokenKind::GreaterThan, ">", start));
                }
            }
            '!' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    i += 2;
                    tokens.push(punct(TokenKind::NotEqual, "!=", start));
                } else {
                    return Err(QueryError::Syntax {
                        expected: "'='".to_string(),
                        got: "!".to_string(),
                        position: start,
                    });
                }
            }
            '=' => {
                i += 1;
                tokens.push(punct(TokenKind::Equal, "=", start));
            }
            '.' => {
                i += 1;
                tokens.push(punct(TokenKind::Dot, ".", start));
            }
            ',' => {
                i += 1;
                tokens.push(punct(TokenKind::Comma, ",", start));
            }
            '(' => {
                i += 1;
                tokens.push(punct(TokenKind::OpenParen, "(", start));
            }
            ')' => {
                i += 1;
                tokens.push(punct(TokenKind::CloseParen, ")", start));
            }
            '+' => {
                i += 1;
                tokens.push(punct(TokenKind::Plus, "+", start));
            }
            '-' => {
                i += 1;
                tokens.push(punct(TokenKind::Minus, "-", start));
            }
            '*' => {
                i += 1;
                tokens.push(punct(TokenKind::Star, "*", start));
            }
            '/' => {
                i += 1;
                tokens.push(punct(TokenKind::Slash, "/", start));
            }
            other => {
                return Err(QueryError::Syntax {
                    expected: "token".to_string(),
                    got: other.to_string(),
                    position: start,
                });
            }
        }
    }

    Ok(tokens)
}

fn punct(kind: TokenKind, value: &str, position: usize) -> Token {
    Token {
        kind,
        value: value.to_string(),
        position,
    }
}
