//! Cost-based query planning.
//!
//! The WHERE clause is decomposed into top-level AND conjuncts. Each conjunct
//! that an index can answer becomes a candidate seed; the cheapest candidate
//! (by estimated cardinality from the index statistics) seeds the result set,
//! the remaining indexable conjuncts narrow it by set intersection, and
//! everything else is kept as a residual expression evaluated per node.
//!
//! `total` in a query result is exact. A plan is marked for bounded pull
//! (hydrate only `offset + limit` nodes) only when there is no residual, so
//! the total can be read off the narrowed id set without evaluating every
//! candidate.

use std::fmt::Write as _;

use tracing::debug;

use crate::db::EngineConfig;
use crate::error::Result;
use crate::index::IndexSet;
use crate::model::{CompareOp, NodeType};

use super::ast::{AttrCondition, Expr, Operand, Query, RelCondition};
use super::validate::{validate, validate_subquery, ValidationReport};

/// How the candidate id set is seeded.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedStrategy {
    /// Full scan of the type index.
    TypeScan,
    /// Exact-match secondary index lookup.
    PropertyEq(AttrCondition),
    /// Range scan over a numeric secondary index.
    PropertyRange(AttrCondition),
    /// Depth-1 relationship seeded from the reverse edge index: the
    /// candidates are the sources of edges into the resolved target.
    ReverseEdge(RelCondition),
}

/// An exact narrowing step applied to the seeded id set by intersection.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrowStep {
    Attr(AttrCondition),
    /// Depth-1 relationship narrowed through the reverse edge index.
    Rel(RelCondition),
}

/// Executable plan for one query.
#[derive(Debug)]
pub struct Plan {
    pub node_type: NodeType,
    pub seed: SeedStrategy,
    pub narrowing: Vec<NarrowStep>,
    pub residual: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Hydrate only the requested page instead of every matching node.
    /// Only legal when `residual` is `None`.
    pub bounded_pull: bool,
    pub estimated_cost: usize,
    pub warnings: Vec<String>,
}

/// Validate a query and lower it to a plan against one graph version.
pub fn plan(query: &Query, config: &EngineConfig, index: &IndexSet) -> Result<Plan> {
    plan_inner(query, config, index, false)
}

/// Plan an EXISTS subquery pulled out for its own execution. The subquery
/// already passed whole-query validation; re-validating it as a top-level
/// query would reject its `current.*` operands.
pub(crate) fn plan_subquery(
    query: &Query,
    config: &EngineConfig,
    index: &IndexSet,
) -> Result<Plan> {
    plan_inner(query, config, index, true)
}

fn plan_inner(
    query: &Query,
    config: &EngineConfig,
    index: &IndexSet,
    as_subquery: bool,
) -> Result<Plan> {
    let ValidationReport {
        node_type,
        warnings,
    } = if as_subquery {
        validate_subquery(query, config)?
    } else {
        validate(query, config)?
    };

    let mut conjuncts = Vec::new();
    if let Some(expr) = &query.where_clause {
        collect_conjuncts(expr, &mut conjuncts);
    }

    // Classify each conjunct once, keeping its estimate when an index can
    // answer it.
    let mut candidates: Vec<(usize, Candidate)> = Vec::new();
    let mut residual_parts: Vec<Expr> = Vec::new();

    for conjunct in conjuncts {
        match classify(&conjunct, node_type, index) {
            Some(candidate) => candidates.push(candidate),
            None => residual_parts.push(conjunct),
        }
    }

    // Cheapest candidate seeds; the rest narrow.
    let type_cost = index.type_count(node_type);
    let mut seed = SeedStrategy::TypeScan;
    let mut estimated_cost = type_cost;

    if let Some(best) = candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, (est, _))| *est)
        .map(|(i, _)| i)
    {
        let (est, candidate) = candidates.remove(best);
        if est <= type_cost {
            estimated_cost = est;
            seed = match candidate {
                Candidate::Eq(cond) => SeedStrategy::PropertyEq(cond),
                Candidate::Range(cond) => SeedStrategy::PropertyRange(cond),
                Candidate::Rel(cond) => SeedStrategy::ReverseEdge(cond),
            };
        } else {
            candidates.push((est, candidate));
        }
    }

    let narrowing = candidates
        .into_iter()
        .map(|(_, candidate)| match candidate {
            Candidate::Eq(cond) | Candidate::Range(cond) => NarrowStep::Attr(cond),
            Candidate::Rel(cond) => NarrowStep::Rel(cond),
        })
        .collect();

    let residual = residual_parts
        .into_iter()
        .reduce(|a, b| Expr::And(Box::new(a), Box::new(b)));

    let plan = Plan {
        node_type,
        seed,
        narrowing,
        bounded_pull: residual.is_none(),
        residual,
        limit: query.limit,
        offset: query.offset.unwrap_or(0),
        estimated_cost,
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
    };

    debug!(summary = %plan.summary(), "planned query");
    Ok(plan)
}

enum Candidate {
    Eq(AttrCondition),
    Range(AttrCondition),
    Rel(RelCondition),
}

/// Returns the conjunct's index-backed candidate and its estimated
/// cardinality, or `None` when only residual evaluation can answer it.
fn classify(
    conjunct: &Expr,
    node_type: NodeType,
    index: &IndexSet,
) -> Option<(usize, Candidate)> {
    match conjunct {
        Expr::Attr(cond) => {
            let value = match &cond.value {
                Operand::Literal(v) => v,
                // Correlated operands depend on the outer row.
                Operand::CurrentRef(_) => return None,
            };
            match cond.op {
                CompareOp::Eq => {
                    let est = index.estimate(node_type, &cond.property, cond.op, value)?;
                    Some((est, Candidate::Eq(cond.clone())))
                }
                CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
                    let est = index.estimate(node_type, &cond.property, cond.op, value)?;
                    Some((est, Candidate::Range(cond.clone())))
                }
                // Ne and LIKE scan whatever set they are applied to.
                _ => None,
            }
        }
        Expr::Rel(cond) if cond.depth == 1 => {
            // Fan-in through the reverse edge index, summed over every node
            // the target literal resolves to.
            let est: usize = index
                .resolve_name(&cond.target)
                .iter()
                .map(|id| index.sources_of(id, cond.relation).len())
                .sum();
            Some((est, Candidate::Rel(cond.clone())))
        }
        _ => None,
    }
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::And(a, b) => {
            collect_conjuncts(a, out);
            collect_conjuncts(b, out);
        }
        other => out.push(other.clone()),
    }
}

impl Plan {
    /// Human-readable plan description, returned alongside query results.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "seed={} est={}", self.seed_label(), self.estimated_cost);
        if !self.narrowing.is_empty() {
            let steps: Vec<String> = self
                .narrowing
                .iter()
                .map(|step| match step {
                    NarrowStep::Attr(c) => c.to_string(),
                    NarrowStep::Rel(c) => c.to_string(),
                })
                .collect();
            let _ = write!(out, " narrow=[{}]", steps.join(", "));
        }
        if let Some(residual) = &self.residual {
            let _ = write!(out, " residual={residual}");
        }
        let _ = write!(
            out,
            " pull={}",
            if self.bounded_pull { "bounded" } else { "full" }
        );
        for warning in &self.warnings {
            let _ = write!(out, " warning=\"{warning}\"");
        }
        out
    }

    fn seed_label(&self) -> String {
        match &self.seed {
            SeedStrategy::TypeScan => format!("type_scan({})", self.node_type),
            SeedStrategy::PropertyEq(c) => format!("index_eq({})", c.property),
            SeedStrategy::PropertyRange(c) => format!("index_range({})", c.property),
            SeedStrategy::ReverseEdge(c) => {
                format!("reverse_edge({} '{}')", c.relation, c.target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, EdgeType, Node, Properties, PropertyValue};
    use crate::model::{Graph, NodeType};
    use crate::query::parser::parse;

    fn function(id: &str, name: &str, complexity: i64) -> Node {
        let mut props = Properties::new();
        props.insert("name".into(), PropertyValue::Str(name.into()));
        props.insert("complexity".into(), PropertyValue::Int(complexity));
        Node::new(id, NodeType::Function, props)
    }

    fn sample_index() -> IndexSet {
        let mut g = Graph::new();
        g.add_node(function("f:main", "main", 3));
        g.add_node(function("f:helper", "helper", 12));
        g.add_node(function("f:util", "util", 20));
        g.add_edge(Edge::new("f:main", "f:helper", EdgeType::Calling));
        g.add_edge(Edge::new("f:helper", "f:util", EdgeType::Calling));
        let allow: Vec<String> = crate::model::schema::DEFAULT_INDEXED_PROPERTIES
            .iter()
            .map(|s| s.to_string())
            .collect();
        IndexSet::build(&g, &allow)
    }

    fn plan_str(input: &str) -> Plan {
        let query = parse(input).unwrap();
        plan(&query, &EngineConfig::default(), &sample_index()).unwrap()
    }

    #[test]
    fn test_equality_seeds_from_index() {
        let p = plan_str("FIND function WHERE name = 'helper'");
        assert!(matches!(p.seed, SeedStrategy::PropertyEq(_)));
        assert_eq!(p.estimated_cost, 1);
        assert!(p.residual.is_none());
        assert!(p.bounded_pull);
    }

    #[test]
    fn test_cheapest_conjunct_wins() {
        // name = 'helper' (1 hit) should beat complexity > 1 (3 hits); the
        // range predicate becomes a narrowing step, not a residual.
        let p = plan_str("FIND function WHERE complexity > 1 AND name = 'helper'");
        assert!(matches!(p.seed, SeedStrategy::PropertyEq(_)));
        assert_eq!(p.narrowing.len(), 1);
        assert!(p.residual.is_none());
        assert!(p.bounded_pull);
    }

    #[test]
    fn test_like_is_residual() {
        let p = plan_str("FIND function WHERE name LIKE 'help%'");
        assert!(matches!(p.seed, SeedStrategy::TypeScan));
        assert!(p.residual.is_some());
        assert!(!p.bounded_pull);
    }

    #[test]
    fn test_depth_one_relationship_seeds_from_reverse_edges() {
        let p = plan_str("FIND function WHERE CALLING 'helper'");
        assert!(matches!(p.seed, SeedStrategy::ReverseEdge(_)));
        assert_eq!(p.estimated_cost, 1);
    }

    #[test]
    fn test_deep_relationship_is_residual() {
        let p = plan_str("FIND function WHERE CALLING 'util' DEPTH 3");
        assert!(matches!(p.seed, SeedStrategy::TypeScan));
        assert!(p.residual.is_some());
        assert!(!p.bounded_pull);
    }

    #[test]
    fn test_or_is_residual() {
        let p = plan_str("FIND function WHERE name = 'main' OR name = 'util'");
        assert!(matches!(p.seed, SeedStrategy::TypeScan));
        assert!(p.residual.is_some());
    }

    #[test]
    fn test_unknown_property_warns_but_plans() {
        let p = plan_str("FIND function WHERE docstring = 'x'");
        assert_eq!(p.warnings.len(), 1);
        assert!(p.residual.is_some());
    }

    #[test]
    fn test_correlated_subquery_plans_standalone() {
        // The executor re-plans the inner query on its own; its `current.*`
        // operand must stay legal there.
        let outer = plan_str("FIND class WHERE EXISTS (FIND function WHERE name = current.name)");
        assert!(outer.residual.is_some());

        let inner = parse("FIND function WHERE name = current.name").unwrap();
        let p = plan_subquery(&inner, &EngineConfig::default(), &sample_index()).unwrap();
        assert!(p.residual.is_some());
    }

    #[test]
    fn test_unknown_node_type_fails() {
        let query = parse("FIND gadget WHERE name = 'x'").unwrap();
        let err = plan(&query, &EngineConfig::default(), &sample_index()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_NODE_TYPE");
    }

    #[test]
    fn test_summary_mentions_seed_and_pull() {
        let p = plan_str("FIND function WHERE name = 'helper' LIMIT 1");
        let summary = p.summary();
        assert!(summary.contains("index_eq(name)"), "{summary}");
        assert!(summary.contains("pull=bounded"), "{summary}");
    }
}
