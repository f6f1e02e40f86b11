//! Semantic validation of a parsed query.
//!
//! Runs after parsing, before planning. Fatal: unknown node type, literal
//! kind incompatible with a known property, DEPTH beyond the traversal
//! ceiling, `current.*` outside a subquery. Non-fatal: unknown property on a
//! known type — collected as a structured warning; the predicate evaluates
//! over an absent property and is therefore false at runtime.

use std::str::FromStr;

use tracing::warn;

use crate::db::EngineConfig;
use crate::error::{QueryError, Result};
use crate::model::{schema, CompareOp, NodeType, PropertyKind};

use super::ast::{AttrCondition, Expr, Operand, Query};

/// Outcome of validating one query: the resolved node type plus any
/// unknown-property warnings (rendered into the plan summary).
#[derive(Debug)]
pub struct ValidationReport {
    pub node_type: NodeType,
    pub warnings: Vec<QueryError>,
}

pub fn validate(query: &Query, config: &EngineConfig) -> Result<ValidationReport> {
    validate_inner(query, config, false)
}

/// Validation entry point for a subquery planned on its own at execution
/// time: `current.*` operands are legal at the top level here.
pub(crate) fn validate_subquery(query: &Query, config: &EngineConfig) -> Result<ValidationReport> {
    validate_inner(query, config, true)
}

fn validate_inner(
    query: &Query,
    config: &EngineConfig,
    in_subquery: bool,
) -> Result<ValidationReport> {
    let node_type = NodeType::from_str(&query.find.node_type)
        .map_err(|_| QueryError::UnknownNodeType(query.find.node_type.clone()))?;

    let mut warnings = Vec::new();
    if let Some(expr) = &query.where_clause {
        validate_expr(expr, node_type, config, in_subquery, &mut warnings)?;
    }

    Ok(ValidationReport {
        node_type,
        warnings,
    })
}

fn validate_expr(
    expr: &Expr,
    node_type: NodeType,
    config: &EngineConfig,
    in_subquery: bool,
    warnings: &mut Vec<QueryError>,
) -> Result<()> {
    match expr {
        Expr::And(a, b) | Expr::Or(a, b) => {
            validate_expr(a, node_type, config, in_subquery, warnings)?;
            validate_expr(b, node_type, config, in_subquery, warnings)?;
        }
        Expr::Not(inner) => validate_expr(inner, node_type, config, in_subquery, warnings)?,
        Expr::Attr(cond) => validate_attr(cond, node_type, in_subquery, warnings)?,
        Expr::Rel(cond) => {
            if cond.depth > config.max_traversal_depth {
                return Err(QueryError::TraversalLimitExceeded(format!(
                    "DEPTH {} exceeds maximum {}",
                    cond.depth, config.max_traversal_depth
                )));
            }
        }
        Expr::Exists(subquery) => {
            let report = validate_inner(subquery, config, true)?;
            warnings.extend(report.warnings);
        }
    }
    Ok(())
}

fn validate_attr(
    cond: &AttrCondition,
    node_type: NodeType,
    in_subquery: bool,
    warnings: &mut Vec<QueryError>,
) -> Result<()> {
    let declared = schema::property_kind(node_type, &cond.property);

    let literal_kind = match &cond.value {
        Operand::Literal(v) => Some(v.kind()),
        Operand::CurrentRef(prop) => {
            if !in_subquery {
                return Err(QueryError::Syntax {
                    message: format!("'current.{prop}' is only legal inside an EXISTS subquery"),
                    position: cond.position,
                });
            }
            // Correlated operand's kind depends on the outer row; checked
            // defensively at runtime.
            None
        }
    };

    match declared {
        None => {
            warn!(
                node_type = %node_type,
                property = %cond.property,
                "unknown property in query, treated as absent"
            );
            warnings.push(QueryError::UnknownProperty {
                node_type: node_type.to_string(),
                property: cond.property.clone(),
            });
        }
        Some(expected) => {
            if cond.op == CompareOp::Like && expected != PropertyKind::Str {
                return Err(QueryError::TypeMismatch {
                    property: cond.property.clone(),
                    expected: PropertyKind::Str,
                    found: expected,
                });
            }
            if let Some(found) = literal_kind {
                if cond.op == CompareOp::Like && found != PropertyKind::Str {
                    return Err(QueryError::TypeMismatch {
                        property: cond.property.clone(),
                        expected: PropertyKind::Str,
                        found,
                    });
                }
                if !expected.is_comparable_with(found) {
                    return Err(QueryError::TypeMismatch {
                        property: cond.property.clone(),
                        expected,
                        found,
                    });
                }
            }
        }
    }

    Ok(())
}
