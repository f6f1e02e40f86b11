//! In-memory secondary indexes over a loaded graph version.
//!
//! Rebuilt from scratch on every `save_graph` and swapped atomically with the
//! data they index — a reader never observes data without its index entries.
//! All structures are scoped to one graph version, never process-wide.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use crate::model::{CompareOp, EdgeType, Graph, NodeType, PropertyValue};

/// Total-ordering key for numeric property indexes (f64 is not Ord).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumKey(pub f64);

impl Eq for NumKey {}

impl PartialOrd for NumKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One secondary index over a (node type, property) pair.
///
/// Numeric properties get a range-capable ordered index; strings and
/// booleans get an exact-match index. Other kinds are not indexed.
#[derive(Debug)]
enum PropertyIndex {
    Numeric(BTreeMap<NumKey, BTreeSet<String>>),
    Exact(HashMap<String, BTreeSet<String>>),
}

impl PropertyIndex {
    fn insert(&mut self, value: &PropertyValue, node_id: &str) {
        match (self, value) {
            (PropertyIndex::Numeric(map), v) => {
                if let Some(n) = v.as_f64() {
                    map.entry(NumKey(n)).or_default().insert(node_id.to_string());
                }
            }
            (PropertyIndex::Exact(map), PropertyValue::Str(s)) => {
                map.entry(s.clone()).or_default().insert(node_id.to_string());
            }
            (PropertyIndex::Exact(map), PropertyValue::Bool(b)) => {
                map.entry(b.to_string())
                    .or_default()
                    .insert(node_id.to_string());
            }
            _ => {}
        }
    }

    fn len(&self) -> usize {
        match self {
            PropertyIndex::Numeric(map) => map.values().map(BTreeSet::len).sum(),
            PropertyIndex::Exact(map) => map.values().map(BTreeSet::len).sum(),
        }
    }
}

static EMPTY_IDS: BTreeSet<String> = BTreeSet::new();

/// Full index set for one graph version: type index, property indexes over
/// the configured allow-list, bidirectional edge indexes, name index, and
/// the cardinality statistics the planner costs strategies with.
#[derive(Debug, Default)]
pub struct IndexSet {
    type_index: HashMap<NodeType, BTreeSet<String>>,
    property: HashMap<(NodeType, String), PropertyIndex>,
    edges_out: HashMap<(String, EdgeType), BTreeSet<String>>,
    edges_in: HashMap<(String, EdgeType), BTreeSet<String>>,
    /// name and qualified_name → node ids, for relationship-target literals
    names: HashMap<String, BTreeSet<String>>,
    node_total: usize,
}

impl IndexSet {
    /// Build all indexes from a graph in one pass per side.
    ///
    /// The node-side pass (type, property, name indexes) and the edge-side
    /// pass (bidirectional adjacency) are independent and run in parallel.
    pub fn build(graph: &Graph, indexed_properties: &[String]) -> IndexSet {
        let (node_side, edge_side) = rayon::join(
            || Self::build_node_side(graph, indexed_properties),
            || Self::build_edge_side(graph),
        );

        let (type_index, property, names) = node_side;
        let (edges_out, edges_in) = edge_side;

        IndexSet {
            type_index,
            property,
            edges_out,
            edges_in,
            names,
            node_total: graph.node_count(),
        }
    }

    #[allow(clippy::type_complexity)]
    fn build_node_side(
        graph: &Graph,
        indexed_properties: &[String],
    ) -> (
        HashMap<NodeType, BTreeSet<String>>,
        HashMap<(NodeType, String), PropertyIndex>,
        HashMap<String, BTreeSet<String>>,
    ) {
        let mut type_index: HashMap<NodeType, BTreeSet<String>> = HashMap::new();
        let mut property: HashMap<(NodeType, String), PropertyIndex> = HashMap::new();
        let mut names: HashMap<String, BTreeSet<String>> = HashMap::new();

        for node in graph.nodes() {
            type_index
                .entry(node.node_type)
                .or_default()
                .insert(node.id.clone());

            for prop in indexed_properties {
                if let Some(value) = node.property(prop) {
                    let index = property
                        .entry((node.node_type, prop.clone()))
                        .or_insert_with(|| match value {
                            PropertyValue::Int(_) | PropertyValue::Float(_) => {
                                PropertyIndex::Numeric(BTreeMap::new())
                            }
                            _ => PropertyIndex::Exact(HashMap::new()),
                        });
                    index.insert(value, &node.id);
                }
            }

            if let Some(name) = node.name() {
                names
                    .entry(name.to_string())
                    .or_default()
                    .insert(node.id.clone());
            }
            if let Some(qname) = node.qualified_name() {
                names
                    .entry(qname.to_string())
                    .or_default()
                    .insert(node.id.clone());
            }
        }

        (type_index, property, names)
    }

    #[allow(clippy::type_complexity)]
    fn build_edge_side(
        graph: &Graph,
    ) -> (
        HashMap<(String, EdgeType), BTreeSet<String>>,
        HashMap<(String, EdgeType), BTreeSet<String>>,
    ) {
        let mut edges_out: HashMap<(String, EdgeType), BTreeSet<String>> = HashMap::new();
        let mut edges_in: HashMap<(String, EdgeType), BTreeSet<String>> = HashMap::new();

        for edge in graph.edges() {
            edges_out
                .entry((edge.source.clone(), edge.edge_type))
                .or_default()
                .insert(edge.target.clone());
            edges_in
                .entry((edge.target.clone(), edge.edge_type))
                .or_default()
                .insert(edge.source.clone());
        }

        (edges_out, edges_in)
    }

    /// All node ids of a type, in ascending id order.
    pub fn nodes_of_type(&self, node_type: NodeType) -> &BTreeSet<String> {
        self.type_index.get(&node_type).unwrap_or(&EMPTY_IDS)
    }

    pub fn type_count(&self, node_type: NodeType) -> usize {
        self.nodes_of_type(node_type).len()
    }

    pub fn node_total(&self) -> usize {
        self.node_total
    }

    /// Whether a (type, property) pair has a secondary index at all.
    pub fn is_indexed(&self, node_type: NodeType, property: &str) -> bool {
        self.property
            .contains_key(&(node_type, property.to_string()))
    }

    /// Whether the index for the pair supports range operators.
    pub fn is_range_indexed(&self, node_type: NodeType, property: &str) -> bool {
        matches!(
            self.property.get(&(node_type, property.to_string())),
            Some(PropertyIndex::Numeric(_))
        )
    }

    /// Exact-match lookup. Returns `None` when the pair is not indexed or the
    /// value kind does not fit the index (caller falls back to a post-filter).
    pub fn lookup_eq(
        &self,
        node_type: NodeType,
        property: &str,
        value: &PropertyValue,
    ) -> Option<BTreeSet<String>> {
        match self.property.get(&(node_type, property.to_string()))? {
            PropertyIndex::Numeric(map) => {
                let n = value.as_f64()?;
                Some(map.get(&NumKey(n)).cloned().unwrap_or_default())
            }
            PropertyIndex::Exact(map) => {
                let key = match value {
                    PropertyValue::Str(s) => s.clone(),
                    PropertyValue::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some(map.get(&key).cloned().unwrap_or_default())
            }
        }
    }

    /// Range lookup for >, >=, <, <= on a numeric index.
    pub fn lookup_range(
        &self,
        node_type: NodeType,
        property: &str,
        op: CompareOp,
        value: &PropertyValue,
    ) -> Option<BTreeSet<String>> {
        let map = match self.property.get(&(node_type, property.to_string()))? {
            PropertyIndex::Numeric(map) => map,
            PropertyIndex::Exact(_) => return None,
        };
        let n = NumKey(value.as_f64()?);

        let range: Box<dyn Iterator<Item = &BTreeSet<String>>> = match op {
            CompareOp::Gt => Box::new(
                map.range((Bound::Excluded(n), Bound::Unbounded))
                    .map(|(_, ids)| ids),
            ),
            CompareOp::Gte => Box::new(
                map.range((Bound::Included(n), Bound::Unbounded))
                    .map(|(_, ids)| ids),
            ),
            CompareOp::Lt => Box::new(
                map.range((Bound::Unbounded, Bound::Excluded(n)))
                    .map(|(_, ids)| ids),
            ),
            CompareOp::Lte => Box::new(
                map.range((Bound::Unbounded, Bound::Included(n)))
                    .map(|(_, ids)| ids),
            ),
            _ => return None,
        };

        let mut out = BTreeSet::new();
        for ids in range {
            out.extend(ids.iter().cloned());
        }
        Some(out)
    }

    /// Estimated result cardinality for an indexable predicate, `None` when
    /// the predicate cannot be answered from an index.
    pub fn estimate(
        &self,
        node_type: NodeType,
        property: &str,
        op: CompareOp,
        value: &PropertyValue,
    ) -> Option<usize> {
        match op {
            CompareOp::Eq => self.lookup_eq(node_type, property, value).map(|s| s.len()),
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => self
                .lookup_range(node_type, property, op, value)
                .map(|s| s.len()),
            _ => None,
        }
    }

    /// Total entries in a property index (used for fan-out statistics).
    pub fn property_index_len(&self, node_type: NodeType, property: &str) -> usize {
        self.property
            .get(&(node_type, property.to_string()))
            .map(|idx| idx.len())
            .unwrap_or(0)
    }

    /// Node ids whose name or qualified name equals the literal.
    pub fn resolve_name(&self, name: &str) -> &BTreeSet<String> {
        self.names.get(name).unwrap_or(&EMPTY_IDS)
    }

    /// Targets reachable from `source` over one edge of `edge_type`.
    pub fn targets_of(&self, source: &str, edge_type: EdgeType) -> &BTreeSet<String> {
        self.edges_out
            .get(&(source.to_string(), edge_type))
            .unwrap_or(&EMPTY_IDS)
    }

    /// Sources with a direct edge of `edge_type` into `target`.
    pub fn sources_of(&self, target: &str, edge_type: EdgeType) -> &BTreeSet<String> {
        self.edges_in
            .get(&(target.to_string(), edge_type))
            .unwrap_or(&EMPTY_IDS)
    }
}
