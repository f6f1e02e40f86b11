//! Recursive-descent parser for the FIND query DSL.
//!
//! Grammar (AND binds tighter than OR, NOT tighter still):
//!
//! ```text
//! Query      ::= FIND ident [AS ident] [WHERE OrExpr] [LIMIT int] [OFFSET int]
//! OrExpr     ::= AndExpr (OR AndExpr)*
//! AndExpr    ::= Unary (AND Unary)*
//! Unary      ::= NOT Unary | Primary
//! Primary    ::= '(' OrExpr ')'
//!              | EXISTS '(' Query ')'
//!              | ident op Value
//!              | RELATION string [DEPTH int]
//! Value      ::= string | int | float | true | false | current '.' ident
//! ```
//!
//! The parser performs no semantic checks; node types, properties and
//! literal kinds are validated by the planner.

use std::str::FromStr;

use crate::error::{QueryError, Result};
use crate::model::{CompareOp, EdgeType, PropertyValue};

use super::ast::{AttrCondition, Expr, FindClause, Operand, Query, RelCondition};
use super::lexer::{tokenize, Keyword, Token, TokenKind};

/// Parse a query string into an AST.
pub fn parse(input: &str) -> Result<Query> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_query()?;
    parser.expect_eof()?;
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.current().kind == TokenKind::Keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            message: message.into(),
            position: self.current().position,
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if self.current().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.syntax_error(format!(
                "unexpected trailing input: {:?}",
                self.current().kind
            )))
        }
    }

    fn parse_query(&mut self) -> Result<Query> {
        if !self.eat_keyword(Keyword::Find) {
            return Err(self.syntax_error("expected FIND"));
        }

        let find = self.parse_find_tail()?;

        let where_clause = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_or()?)
        } else {
            None
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_unsigned("LIMIT")?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_unsigned("OFFSET")?)
        } else {
            None
        };

        Ok(Query {
            find,
            where_clause,
            limit,
            offset,
        })
    }

    fn parse_find_tail(&mut self) -> Result<FindClause> {
        let position = self.current().position;
        let node_type = match self.advance().kind {
            TokenKind::Ident(name) => name,
            other => {
                return Err(QueryError::Syntax {
                    message: format!("expected node type after FIND, got {other:?}"),
                    position,
                })
            }
        };

        let alias = if self.eat_keyword(Keyword::As) {
            match self.advance().kind {
                TokenKind::Ident(name) => Some(name),
                other => {
                    return Err(self.syntax_error(format!("expected alias after AS, got {other:?}")))
                }
            }
        } else {
            None
        };

        Ok(FindClause {
            node_type,
            position,
            alias,
        })
    }

    fn parse_unsigned(&mut self, clause: &str) -> Result<usize> {
        match self.advance().kind {
            TokenKind::Int(n) if n >= 0 => Ok(n as usize),
            TokenKind::Int(_) => Err(self.syntax_error(format!("{clause} must be non-negative"))),
            other => Err(self.syntax_error(format!("expected number after {clause}, got {other:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_keyword(Keyword::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().kind.clone() {
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                if self.current().kind != TokenKind::RParen {
                    return Err(self.syntax_error("expected ')'"));
                }
                self.advance();
                Ok(expr)
            }
            TokenKind::Keyword(Keyword::Exists) => {
                self.advance();
                if self.current().kind != TokenKind::LParen {
                    return Err(self.syntax_error("expected '(' after EXISTS"));
                }
                self.advance();
                let subquery = self.parse_query()?;
                if self.current().kind != TokenKind::RParen {
                    return Err(self.syntax_error("expected ')' after subquery"));
                }
                self.advance();
                Ok(Expr::Exists(Box::new(subquery)))
            }
            TokenKind::Keyword(kw) if relation_of(kw).is_some() => {
                let position = self.current().position;
                self.advance();
                let relation = relation_of(kw).unwrap();
                let target = match self.advance().kind {
                    TokenKind::Str(s) => s,
                    other => {
                        return Err(self.syntax_error(format!(
                            "expected quoted target after {relation}, got {other:?}"
                        )))
                    }
                };
                let depth = if self.eat_keyword(Keyword::Depth) {
                    let d = self.parse_unsigned("DEPTH")?;
                    if d == 0 {
                        return Err(self.syntax_error("DEPTH must be at least 1"));
                    }
                    d
                } else {
                    1
                };
                Ok(Expr::Rel(RelCondition {
                    relation,
                    target,
                    depth,
                    position,
                }))
            }
            TokenKind::Ident(property) => {
                let position = self.current().position;
                self.advance();
                let op = match self.advance().kind {
                    TokenKind::Op(op) => op,
                    TokenKind::Keyword(Keyword::Like) => CompareOp::Like,
                    other => {
                        return Err(QueryError::Syntax {
                            message: format!("expected operator after '{property}', got {other:?}"),
                            position,
                        })
                    }
                };
                let value = self.parse_operand()?;
                Ok(Expr::Attr(AttrCondition {
                    property,
                    op,
                    value,
                    position,
                }))
            }
            other => Err(self.syntax_error(format!("unexpected token in condition: {other:?}"))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.advance().kind {
            TokenKind::Str(s) => Ok(Operand::Literal(PropertyValue::Str(s))),
            TokenKind::Int(n) => Ok(Operand::Literal(PropertyValue::Int(n))),
            TokenKind::Float(x) => Ok(Operand::Literal(PropertyValue::Float(x))),
            TokenKind::Keyword(Keyword::True) => Ok(Operand::Literal(PropertyValue::Bool(true))),
            TokenKind::Keyword(Keyword::False) => Ok(Operand::Literal(PropertyValue::Bool(false))),
            TokenKind::Ident(ident) if ident == "current" => {
                if self.current().kind != TokenKind::Dot {
                    return Err(self.syntax_error("expected '.' after 'current'"));
                }
                self.advance();
                match self.advance().kind {
                    TokenKind::Ident(prop) => Ok(Operand::CurrentRef(prop)),
                    other => Err(self.syntax_error(format!(
                        "expected property name after 'current.', got {other:?}"
                    ))),
                }
            }
            other => Err(self.syntax_error(format!("expected value, got {other:?}"))),
        }
    }
}

fn relation_of(kw: Keyword) -> Option<EdgeType> {
    let name = match kw {
        Keyword::Calling => "CALLING",
        Keyword::Inherits => "INHERITS",
        Keyword::Imports => "IMPORTS",
        Keyword::Contains => "CONTAINS",
        Keyword::References => "REFERENCES",
        Keyword::Defines => "DEFINES",
        _ => return None,
    };
    EdgeType::from_str(name).ok()
}
