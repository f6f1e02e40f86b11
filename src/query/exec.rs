//! Plan execution.
//!
//! A plan runs in stages: seed an id set from the chosen index strategy,
//! narrow it by intersection, hydrate nodes from storage with bounded
//! concurrency, evaluate the residual expression per node, then apply
//! aggregation and pagination. `total` is always the exact match count
//! regardless of LIMIT/OFFSET.
//!
//! Relationship conditions run as breadth-first traversals over the edge
//! indexes with a visited set, so cyclic and self-referential graphs
//! terminate; a configurable ceiling on visited nodes turns runaway
//! traversals into `TraversalLimitExceeded` instead of latency.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::db::EngineConfig;
use crate::error::{QueryError, Result};
use crate::index::IndexSet;
use crate::model::{schema, Node, PropertyValue};
use crate::storage::StorageAdapter;

use super::ast::{AttrCondition, Expr, Operand, Query, RelCondition};
use super::plan::{self, NarrowStep, Plan, SeedStrategy};

/// Aggregation requested alongside a query. Count needs no property; the
/// numeric aggregates skip nodes where the property is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateSpec {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    Count(usize),
    Sum(f64),
    Avg(f64),
    Min(f64),
    Max(f64),
}

/// An aggregate answer: one value over the whole match set, or one value
/// per group when `group_by` is set.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
    Single(AggregateValue),
    Grouped(BTreeMap<String, AggregateValue>),
}

/// Per-execution options that are not part of the query text.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub aggregate: Option<AggregateSpec>,
    /// Bucket matches by this property before aggregating. Nodes without
    /// the property fall out of every bucket. Setting this without an
    /// aggregate spec counts per bucket.
    pub group_by: Option<String>,
}

/// One query's answer: the requested page, the exact total match count,
/// an optional aggregate over all matches, and the plan description.
#[derive(Debug)]
pub struct QueryResult {
    pub nodes: Vec<Node>,
    pub total: usize,
    pub aggregate: Option<AggregateResult>,
    pub plan_summary: String,
}

/// Everything one execution needs, scoped to a single graph version.
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub project_id: &'a str,
    pub config: &'a EngineConfig,
    pub index: &'a IndexSet,
    pub store: &'a dyn StorageAdapter,
}

type SubqueryMemo = HashMap<String, bool>;

/// Plan and run a query against one graph version.
pub async fn execute(
    ctx: ExecContext<'_>,
    query: &Query,
    options: &QueryOptions,
) -> Result<QueryResult> {
    let plan = plan::plan(query, ctx.config, ctx.index)?;
    let ids = narrowed_ids(ctx.index, &plan);

    // Aggregates range over every match, so bounded pull is off the table.
    let wants_aggregate = options.aggregate.is_some() || options.group_by.is_some();
    let bounded = plan.bounded_pull && !wants_aggregate;

    if bounded {
        let total = ids.len();
        let page: Vec<String> = ids
            .into_iter()
            .skip(plan.offset)
            .take(plan.limit.unwrap_or(usize::MAX))
            .collect();
        let nodes = hydrate(ctx, page).await?;
        debug!(total, returned = nodes.len(), "bounded pull served page");
        return Ok(QueryResult {
            nodes,
            total,
            aggregate: None,
            plan_summary: plan.summary(),
        });
    }

    let candidates = hydrate(ctx, ids.into_iter().collect()).await?;
    let mut matches = Vec::with_capacity(candidates.len());
    let mut memo = SubqueryMemo::new();
    for node in candidates {
        let keep = match &plan.residual {
            Some(expr) => eval_expr(ctx, expr, &node, None, &mut memo, 0).await?,
            None => true,
        };
        if keep {
            matches.push(node);
        }
    }

    let total = matches.len();
    let aggregate = if wants_aggregate {
        let spec = options.aggregate.clone().unwrap_or(AggregateSpec::Count);
        match &options.group_by {
            None => {
                let refs: Vec<&Node> = matches.iter().collect();
                compute_aggregate(&spec, &refs)?.map(AggregateResult::Single)
            }
            Some(property) => Some(grouped_aggregate(&spec, property, &matches)?),
        }
    } else {
        None
    };
    let nodes = matches
        .into_iter()
        .skip(plan.offset)
        .take(plan.limit.unwrap_or(usize::MAX))
        .collect();

    Ok(QueryResult {
        nodes,
        total,
        aggregate,
        plan_summary: plan.summary(),
    })
}

/// Seed the candidate id set and apply every narrowing intersection.
fn narrowed_ids(index: &IndexSet, plan: &Plan) -> BTreeSet<String> {
    let mut ids = seed_ids(index, plan);
    for step in &plan.narrowing {
        let step_set = match step {
            NarrowStep::Attr(cond) => attr_ids(index, plan, cond),
            NarrowStep::Rel(cond) => rel_source_ids(index, cond),
        };
        ids.retain(|id| step_set.contains(id));
        if ids.is_empty() {
            break;
        }
    }
    ids
}

fn seed_ids(index: &IndexSet, plan: &Plan) -> BTreeSet<String> {
    match &plan.seed {
        SeedStrategy::TypeScan => index.nodes_of_type(plan.node_type).clone(),
        SeedStrategy::PropertyEq(cond) | SeedStrategy::PropertyRange(cond) => {
            attr_ids(index, plan, cond)
        }
        SeedStrategy::ReverseEdge(cond) => {
            let mut ids = rel_source_ids(index, cond);
            // Reverse edges do not discriminate by node type.
            let of_type = index.nodes_of_type(plan.node_type);
            ids.retain(|id| of_type.contains(id));
            ids
        }
    }
}

fn attr_ids(index: &IndexSet, plan: &Plan, cond: &AttrCondition) -> BTreeSet<String> {
    let Operand::Literal(value) = &cond.value else {
        // The planner never lowers a correlated operand to an index step.
        return BTreeSet::new();
    };
    match cond.op {
        crate::model::CompareOp::Eq => index.lookup_eq(plan.node_type, &cond.property, value),
        op => index.lookup_range(plan.node_type, &cond.property, op, value),
    }
    .unwrap_or_default()
}

/// Every node with a direct edge of the relation into any node the target
/// literal resolves to.
fn rel_source_ids(index: &IndexSet, cond: &RelCondition) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for target in index.resolve_name(&cond.target) {
        ids.extend(index.sources_of(target, cond.relation).iter().cloned());
    }
    ids
}

/// Fetch nodes from storage with bounded concurrency, returned in ascending
/// id order. Ids the store no longer knows are skipped with a warning; the
/// index and the store belong to the same version, so a miss means skew.
async fn hydrate(ctx: ExecContext<'_>, ids: Vec<String>) -> Result<Vec<Node>> {
    let fetched: Vec<Option<Node>> = stream::iter(ids)
        .map(|id| async move {
            let node = ctx.store.get_node(ctx.project_id, &id).await?;
            if node.is_none() {
                warn!(project_id = ctx.project_id, node_id = %id, "indexed node missing from storage");
            }
            Ok::<_, QueryError>(node)
        })
        .buffer_unordered(ctx.config.hydration_concurrency)
        .try_collect()
        .await?;

    let mut nodes: Vec<Node> = fetched.into_iter().flatten().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(nodes)
}

/// Recursive boolean evaluation of a residual expression over one node.
///
/// `outer` is the enclosing query's candidate when this runs inside a
/// correlated subquery; `current.*` operands resolve against it.
fn eval_expr<'a>(
    ctx: ExecContext<'a>,
    expr: &'a Expr,
    node: &'a Node,
    outer: Option<&'a Node>,
    memo: &'a mut SubqueryMemo,
    subquery_depth: usize,
) -> BoxFuture<'a, Result<bool>> {
    Box::pin(async move {
        match expr {
            Expr::And(a, b) => {
                Ok(eval_expr(ctx, a, node, outer, memo, subquery_depth).await?
                    && eval_expr(ctx, b, node, outer, memo, subquery_depth).await?)
            }
            Expr::Or(a, b) => {
                Ok(eval_expr(ctx, a, node, outer, memo, subquery_depth).await?
                    || eval_expr(ctx, b, node, outer, memo, subquery_depth).await?)
            }
            Expr::Not(inner) => {
                Ok(!eval_expr(ctx, inner, node, outer, memo, subquery_depth).await?)
            }
            Expr::Attr(cond) => eval_attr(cond, node, outer),
            Expr::Rel(cond) => eval_rel(ctx, cond, node),
            Expr::Exists(subquery) => {
                if subquery_depth >= ctx.config.max_subquery_depth {
                    return Err(QueryError::TraversalLimitExceeded(format!(
                        "subquery nesting exceeds maximum {}",
                        ctx.config.max_subquery_depth
                    )));
                }
                if subquery.is_correlated() {
                    // Correlated: runs per outer node, with this node as
                    // the subquery's `current`.
                    subquery_exists(ctx, subquery, Some(node), subquery_depth + 1).await
                } else {
                    // Uncorrelated: same answer for every outer node, so
                    // memoize by canonical query text.
                    let key = subquery.to_string();
                    if let Some(&hit) = memo.get(&key) {
                        return Ok(hit);
                    }
                    let hit = subquery_exists(ctx, subquery, None, subquery_depth + 1).await?;
                    memo.insert(key, hit);
                    Ok(hit)
                }
            }
        }
    })
}

/// An absent property never matches. A present value whose kind cannot be
/// compared with a literal is surfaced as a mismatch only for properties
/// the schema declares; the data then disagrees with the schema, which
/// validation could not see. Off-schema properties stay advisory end to
/// end, so a kind clash there is an ordinary non-match, as are correlated
/// operands, whose kind is only known at runtime.
fn eval_attr(cond: &AttrCondition, node: &Node, outer: Option<&Node>) -> Result<bool> {
    let Some(actual) = node.property(&cond.property) else {
        return Ok(false);
    };
    let expected: &PropertyValue = match &cond.value {
        Operand::Literal(v) => v,
        Operand::CurrentRef(prop) => match outer.and_then(|n| n.property(prop)) {
            Some(v) => v,
            None => return Ok(false),
        },
    };

    match actual.compare(cond.op, expected) {
        Some(hit) => Ok(hit),
        None => match &cond.value {
            Operand::Literal(_)
                if schema::property_kind(node.node_type, &cond.property).is_some() =>
            {
                Err(QueryError::TypeMismatch {
                    property: cond.property.clone(),
                    expected: expected.kind(),
                    found: actual.kind(),
                })
            }
            _ => Ok(false),
        },
    }
}

/// Bounded BFS over outgoing edges of the relation: does the candidate reach
/// any node the target literal names within `depth` hops?
fn eval_rel(ctx: ExecContext<'_>, cond: &RelCondition, node: &Node) -> Result<bool> {
    let targets = ctx.index.resolve_name(&cond.target);
    if targets.is_empty() {
        return Ok(false);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(node.id.as_str());
    let mut frontier: Vec<&str> = vec![node.id.as_str()];

    for _ in 0..cond.depth {
        let mut next = Vec::new();
        for id in frontier {
            for reached in ctx.index.targets_of(id, cond.relation) {
                if targets.contains(reached) {
                    return Ok(true);
                }
                if visited.insert(reached.as_str()) {
                    if visited.len() > ctx.config.max_visited_nodes {
                        return Err(QueryError::TraversalLimitExceeded(format!(
                            "traversal from '{}' visited more than {} nodes",
                            node.id, ctx.config.max_visited_nodes
                        )));
                    }
                    next.push(reached.as_str());
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(false)
}

/// Existence check for a subquery: stop at the first matching node.
fn subquery_exists<'a>(
    ctx: ExecContext<'a>,
    query: &'a Query,
    outer: Option<&'a Node>,
    subquery_depth: usize,
) -> BoxFuture<'a, Result<bool>> {
    Box::pin(async move {
        let plan = plan::plan_subquery(query, ctx.config, ctx.index)?;
        let ids = narrowed_ids(ctx.index, &plan);

        let Some(residual) = &plan.residual else {
            return Ok(!ids.is_empty());
        };

        let mut memo = SubqueryMemo::new();
        for id in ids {
            let Some(node) = ctx.store.get_node(ctx.project_id, &id).await? else {
                continue;
            };
            if eval_expr(ctx, residual, &node, outer, &mut memo, subquery_depth).await? {
                return Ok(true);
            }
        }
        Ok(false)
    })
}

/// Bucket matches by the group property's rendered value, then aggregate
/// each bucket independently. Nodes without the group property belong to
/// no bucket; buckets whose aggregate has no value are dropped.
fn grouped_aggregate(
    spec: &AggregateSpec,
    property: &str,
    matches: &[Node],
) -> Result<AggregateResult> {
    let mut buckets: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
    for node in matches {
        if let Some(value) = node.property(property) {
            buckets.entry(group_key(value)).or_default().push(node);
        }
    }

    let mut out = BTreeMap::new();
    for (key, bucket) in buckets {
        if let Some(value) = compute_aggregate(spec, &bucket)? {
            out.insert(key, value);
        }
    }
    Ok(AggregateResult::Grouped(out))
}

/// Stable bucket label: the bare string for string properties, the display
/// form for everything else.
fn group_key(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Count always answers; Sum of nothing is zero; Avg, Min and Max of an
/// empty (or property-less) match set have no value and yield `None`.
fn compute_aggregate(spec: &AggregateSpec, matches: &[&Node]) -> Result<Option<AggregateValue>> {
    let numeric = |property: &str| -> Result<Vec<f64>> {
        let mut out = Vec::new();
        for node in matches {
            if let Some(value) = node.property(property) {
                match value.as_f64() {
                    Some(n) => out.push(n),
                    None => {
                        return Err(QueryError::TypeMismatch {
                            property: property.to_string(),
                            expected: crate::model::PropertyKind::Float,
                            found: value.kind(),
                        })
                    }
                }
            }
        }
        Ok(out)
    };

    Ok(match spec {
        AggregateSpec::Count => Some(AggregateValue::Count(matches.len())),
        AggregateSpec::Sum(p) => Some(AggregateValue::Sum(numeric(p)?.iter().sum())),
        AggregateSpec::Avg(p) => {
            let values = numeric(p)?;
            if values.is_empty() {
                None
            } else {
                Some(AggregateValue::Avg(
                    values.iter().sum::<f64>() / values.len() as f64,
                ))
            }
        }
        AggregateSpec::Min(p) => numeric(p)?
            .into_iter()
            .fold(None, |acc: Option<f64>, n| {
                Some(acc.map_or(n, |a| a.min(n)))
            })
            .map(AggregateValue::Min),
        AggregateSpec::Max(p) => numeric(p)?
            .into_iter()
            .fold(None, |acc: Option<f64>, n| {
                Some(acc.map_or(n, |a| a.max(n)))
            })
            .map(AggregateValue::Max),
    })
}
