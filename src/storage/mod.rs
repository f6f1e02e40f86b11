//! Storage backends behind one adapter contract.
//!
//! Every backend exposes the same six operations so the engine, the index
//! builder and the tiered composition never know which profile they are
//! talking to. `CacheStore` is the low-latency volatile profile,
//! `SqliteStore` the durable one, and `TieredStore` composes both with
//! read-through and write-behind-refresh semantics.

pub mod cache;
pub mod sqlite;
pub mod tiered;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CompareOp, Edge, EdgeType, Graph, Node, NodeType, PropertyValue};

pub use cache::CacheStore;
pub use sqlite::SqliteStore;
pub use tiered::TieredStore;

/// Per-save options. Only the cache tier interprets these today; durable
/// backends ignore them.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// TTL override for this graph version's cache entries.
    pub ttl: Option<Duration>,
}

/// Which side of a node's edges to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A single property predicate pushed down to a backend.
///
/// Backends answer these without any help from the in-memory indexes, so
/// only operators every backend can evaluate are representable (no LIKE).
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    pub property: String,
    pub op: FilterOp,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub(crate) fn as_compare(self) -> CompareOp {
        match self {
            FilterOp::Eq => CompareOp::Eq,
            FilterOp::Ne => CompareOp::Ne,
            FilterOp::Gt => CompareOp::Gt,
            FilterOp::Gte => CompareOp::Gte,
            FilterOp::Lt => CompareOp::Lt,
            FilterOp::Lte => CompareOp::Lte,
        }
    }
}

impl PropertyFilter {
    pub fn new(property: impl Into<String>, op: FilterOp, value: PropertyValue) -> Self {
        PropertyFilter {
            property: property.into(),
            op,
            value,
        }
    }

    /// In-process evaluation, used by backends without predicate pushdown.
    pub(crate) fn matches(&self, node: &Node) -> bool {
        node.property(&self.property)
            .and_then(|v| v.compare(self.op.as_compare(), &self.value))
            .unwrap_or(false)
    }
}

/// Uniform contract every backend implements.
///
/// Graphs are stored per project; a full `save_graph` replaces the previous
/// version of that project atomically from the point of view of readers.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Persist a complete graph version for a project, replacing any
    /// previous one.
    async fn save_graph(&self, project_id: &str, graph: &Graph, opts: &SaveOptions)
        -> Result<()>;

    /// Load a project's graph, `None` when the project has never been saved
    /// or the requested root id does not exist in it.
    ///
    /// With a `root` the result is the subgraph reachable from it (any edge
    /// type, outgoing direction) within `max_depth` hops; `None` depth means
    /// unbounded. Without a root the whole graph is returned.
    async fn load_graph(
        &self,
        project_id: &str,
        root: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Option<Graph>>;

    /// Point lookup of one node.
    async fn get_node(&self, project_id: &str, node_id: &str) -> Result<Option<Node>>;

    /// Set query: nodes of an optional type matching all filters, in
    /// ascending id order, windowed by offset/limit.
    async fn query_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
        filters: &[PropertyFilter],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Node>>;

    /// Edges touching a node, filtered by type and direction.
    async fn get_edges(
        &self,
        project_id: &str,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Edge>>;

    /// Drop everything stored for a project.
    async fn delete_project(&self, project_id: &str) -> Result<()>;
}
