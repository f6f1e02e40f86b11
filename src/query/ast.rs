//! Typed AST for the query DSL.
//!
//! The parser builds this tree without any semantic checking; node-type and
//! property legality is the planner's job. `Display` renders a canonical
//! form of the query, used for plan summaries and subquery memoization.

use std::fmt;

use crate::model::{CompareOp, EdgeType, PropertyValue};

/// A complete parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub find: FindClause,
    pub where_clause: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// `FIND <node_type> [AS <alias>]` — the node type is kept raw here; the
/// validator resolves it (unknown type is a semantic error, not a parse
/// error).
#[derive(Debug, Clone, PartialEq)]
pub struct FindClause {
    pub node_type: String,
    pub position: usize,
    pub alias: Option<String>,
}

/// Boolean WHERE expression. AND binds tighter than OR; NOT tighter still.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Attr(AttrCondition),
    Rel(RelCondition),
    /// `EXISTS ( <subquery> )`. Correlated when the subquery references
    /// `current.*`.
    Exists(Box<Query>),
}

/// `<attr> <op> <value>` — e.g. `complexity > 10`, `name LIKE 'test_%'`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrCondition {
    pub property: String,
    pub op: CompareOp,
    pub value: Operand,
    pub position: usize,
}

/// Right-hand side of an attribute condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(PropertyValue),
    /// `current.<property>` — a reference to the outer query's candidate
    /// node, only legal inside an EXISTS subquery.
    CurrentRef(String),
}

/// `<RELATION> '<target>' [DEPTH n]` — holds when `target` (matched by name
/// or qualified name) is reachable from the candidate within `depth` hops
/// over edges of `relation`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelCondition {
    pub relation: EdgeType,
    pub target: String,
    pub depth: usize,
    pub position: usize,
}

impl Expr {
    /// Syntactic correlation check: does any attribute condition in this
    /// expression (not descending into nested subqueries) reference
    /// `current.*`?
    pub fn references_current(&self) -> bool {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.references_current() || b.references_current()
            }
            Expr::Not(inner) => inner.references_current(),
            Expr::Attr(cond) => matches!(cond.value, Operand::CurrentRef(_)),
            Expr::Rel(_) => false,
            Expr::Exists(_) => false,
        }
    }
}

impl Query {
    /// A subquery is correlated when its own WHERE references `current.*`.
    pub fn is_correlated(&self) -> bool {
        self.where_clause
            .as_ref()
            .map(|e| e.references_current())
            .unwrap_or(false)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FIND {}", self.find.node_type)?;
        if let Some(alias) = &self.find.alias {
            write!(f, " AS {alias}")?;
        }
        if let Some(expr) = &self.where_clause {
            write!(f, " WHERE {expr}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "({a} AND {b})"),
            Expr::Or(a, b) => write!(f, "({a} OR {b})"),
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::Attr(c) => write!(f, "{c}"),
            Expr::Rel(c) => write!(f, "{c}"),
            Expr::Exists(q) => write!(f, "EXISTS ({q})"),
        }
    }
}

impl fmt::Display for AttrCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Operand::Literal(v) => write!(f, "{} {} {v}", self.property, self.op),
            Operand::CurrentRef(p) => write!(f, "{} {} current.{p}", self.property, self.op),
        }
    }
}

impl fmt::Display for RelCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.relation, self.target)?;
        if self.depth != 1 {
            write!(f, " DEPTH {}", self.depth)?;
        }
        Ok(())
    }
}
