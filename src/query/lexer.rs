//! Tokenizer for the FIND query DSL.
//!
//! Keywords are case-insensitive; every token carries its byte offset so
//! syntax and validation errors can point at the offending clause.

use crate::error::{QueryError, Result};
use crate::model::CompareOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Find,
    As,
    Where,
    And,
    Or,
    Not,
    Exists,
    Limit,
    Offset,
    Depth,
    Like,
    True,
    False,
    // relations
    Calling,
    Inherits,
    Imports,
    Contains,
    References,
    Defines,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Keyword> {
        match ident.to_ascii_uppercase().as_str() {
            "FIND" => Some(Keyword::Find),
            "AS" => Some(Keyword::As),
            "WHERE" => Some(Keyword::Where),
            "AND" => Some(Keyword::And),
            "OR" => Some(Keyword::Or),
            "NOT" => Some(Keyword::Not),
            "EXISTS" => Some(Keyword::Exists),
            "LIMIT" => Some(Keyword::Limit),
            "OFFSET" => Some(Keyword::Offset),
            "DEPTH" => Some(Keyword::Depth),
            "LIKE" => Some(Keyword::Like),
            "TRUE" => Some(Keyword::True),
            "FALSE" => Some(Keyword::False),
            "CALLING" => Some(Keyword::Calling),
            "INHERITS" => Some(Keyword::Inherits),
            "IMPORTS" => Some(Keyword::Imports),
            "CONTAINS" => Some(Keyword::Contains),
            "REFERENCES" => Some(Keyword::References),
            "DEFINES" => Some(Keyword::Defines),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(CompareOp),
    LParen,
    RParen,
    Dot,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

impl Token {
    fn new(kind: TokenKind, position: usize) -> Token {
        Token { kind, position }
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        match c {
            '(' => {
                tokens.push(Token::new(TokenKind::LParen, start));
                pos += 1;
            }
            ')' => {
                tokens.push(Token::new(TokenKind::RParen, start));
                pos += 1;
            }
            '.' => {
                tokens.push(Token::new(TokenKind::Dot, start));
                pos += 1;
            }
            '\'' => {
                pos += 1;
                let str_start = pos;
                while pos < bytes.len() && bytes[pos] != b'\'' {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(QueryError::Syntax {
                        message: "unterminated string literal".into(),
                        position: start,
                    });
                }
                tokens.push(Token::new(
                    TokenKind::Str(input[str_start..pos].to_string()),
                    start,
                ));
                pos += 1; // closing quote
            }
            '=' => {
                tokens.push(Token::new(TokenKind::Op(CompareOp::Eq), start));
                pos += 1;
            }
            '!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Ne), start));
                    pos += 2;
                } else {
                    return Err(QueryError::Syntax {
                        message: "unexpected character '!'".into(),
                        position: start,
                    });
                }
            }
            '<' => match bytes.get(pos + 1) {
                Some(b'>') => {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Ne), start));
                    pos += 2;
                }
                Some(b'=') => {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Lte), start));
                    pos += 2;
                }
                _ => {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Lt), start));
                    pos += 1;
                }
            },
            '>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Gte), start));
                    pos += 2;
                } else {
                    tokens.push(Token::new(TokenKind::Op(CompareOp::Gt), start));
                    pos += 1;
                }
            }
            c if c.is_ascii_digit() => {
                while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                    pos += 1;
                }
                let mut is_float = false;
                if pos + 1 < bytes.len()
                    && bytes[pos] == b'.'
                    && (bytes[pos + 1] as char).is_ascii_digit()
                {
                    is_float = true;
                    pos += 1;
                    while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text = &input[start..pos];
                let kind = if is_float {
                    TokenKind::Float(text.parse().map_err(|_| QueryError::Syntax {
                        message: format!("invalid number '{text}'"),
                        position: start,
                    })?)
                } else {
                    TokenKind::Int(text.parse().map_err(|_| QueryError::Syntax {
                        message: format!("invalid number '{text}'"),
                        position: start,
                    })?)
                };
                tokens.push(Token::new(kind, start));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while pos < bytes.len() {
                    let c = bytes[pos] as char;
                    if c.is_ascii_alphanumeric() || c == '_' {
                        pos += 1;
                    } else {
                        break;
                    }
                }
                let ident = &input[start..pos];
                match Keyword::from_ident(ident) {
                    Some(kw) => tokens.push(Token::new(TokenKind::Keyword(kw), start)),
                    None => tokens.push(Token::new(TokenKind::Ident(ident.to_string()), start)),
                }
            }
            c => {
                return Err(QueryError::Syntax {
                    message: format!("unexpected character '{c}'"),
                    position: start,
                });
            }
        }
    }

    tokens.push(Token::new(TokenKind::Eof, input.len()));
    Ok(tokens)
}
