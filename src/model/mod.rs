//! Semantic graph data model
//!
//! Nodes are typed code entities (functions, classes, files, modules,
//! variables) with closed-variant property bags; edges are typed, directed
//! relationships between node ids. The graph keeps nodes in a flat id-keyed
//! map and edges as id pairs, so recursive call graphs (self-loops, cycles)
//! need no special handling anywhere downstream.

pub mod schema;
pub mod value;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use value::{CompareOp, PropertyKind, PropertyValue};

/// Property bag shared by nodes and edges. BTreeMap keeps serialized
/// output deterministic.
pub type Properties = std::collections::BTreeMap<String, PropertyValue>;

/// The fixed set of code-entity kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Function,
    Class,
    File,
    Module,
    Variable,
}

impl NodeType {
    pub const ALL: [NodeType; 5] = [
        NodeType::Function,
        NodeType::Class,
        NodeType::File,
        NodeType::Module,
        NodeType::Variable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Function => "function",
            NodeType::Class => "class",
            NodeType::File => "file",
            NodeType::Module => "module",
            NodeType::Variable => "variable",
        }
    }
}

impl FromStr for NodeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "function" => Ok(NodeType::Function),
            "class" => Ok(NodeType::Class),
            "file" => Ok(NodeType::File),
            "module" => Ok(NodeType::Module),
            "variable" => Ok(NodeType::Variable),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeType {
    Calling,
    Inherits,
    Imports,
    Contains,
    References,
    Defines,
}

impl EdgeType {
    pub const ALL: [EdgeType; 6] = [
        EdgeType::Calling,
        EdgeType::Inherits,
        EdgeType::Imports,
        EdgeType::Contains,
        EdgeType::References,
        EdgeType::Defines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Calling => "CALLING",
            EdgeType::Inherits => "INHERITS",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Contains => "CONTAINS",
            EdgeType::References => "REFERENCES",
            EdgeType::Defines => "DEFINES",
        }
    }
}

impl FromStr for EdgeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "CALLING" => Ok(EdgeType::Calling),
            "INHERITS" => Ok(EdgeType::Inherits),
            "IMPORTS" => Ok(EdgeType::Imports),
            "CONTAINS" => Ok(EdgeType::Contains),
            "REFERENCES" => Ok(EdgeType::References),
            "DEFINES" => Ok(EdgeType::Defines),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed code entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, properties: Properties) -> Self {
        let now = Utc::now();
        Node {
            id: id.into(),
            node_type,
            properties,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Short name from the advisory property set (files use their path).
    pub fn name(&self) -> Option<&str> {
        self.properties
            .get("name")
            .or_else(|| self.properties.get("path"))
            .and_then(|v| v.as_str())
    }

    /// Fully qualified name; falls back to the short name.
    pub fn qualified_name(&self) -> Option<&str> {
        self.properties
            .get("qualified_name")
            .and_then(|v| v.as_str())
            .or_else(|| self.name())
    }
}

/// A typed, directed relationship between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, edge_type: EdgeType) -> Self {
        Edge {
            source: source.into(),
            target: target.into(),
            edge_type,
            properties: Properties::new(),
            weight: 1.0,
        }
    }
}

/// Bulk node/edge object used by the ingestion contract and `load_graph`.
///
/// Node ids are unique (last insert wins); multiple edges of different types
/// between the same pair, self-loops and cycles are all legal. Edges whose
/// endpoints are missing are kept with a warning so partial ingestion
/// survives — the query engine treats them as unreachable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphWire", into = "GraphWire")]
pub struct Graph {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            warn!(
                source = %edge.source,
                target = %edge.target,
                edge_type = %edge.edge_type,
                "dangling edge endpoint, keeping edge"
            );
        }
        let idx = self.edges.len();
        self.outgoing.entry(edge.source.clone()).or_default().push(idx);
        self.incoming.entry(edge.target.clone()).or_default().push(idx);
        self.edges.push(edge);
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn outgoing_edges<'a>(
        &'a self,
        node_id: &str,
        edge_type: Option<EdgeType>,
    ) -> impl Iterator<Item = &'a Edge> {
        self.outgoing
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.edges[i])
            .filter(move |e| edge_type.map_or(true, |t| e.edge_type == t))
    }

    pub fn incoming_edges<'a>(
        &'a self,
        node_id: &str,
        edge_type: Option<EdgeType>,
    ) -> impl Iterator<Item = &'a Edge> {
        self.incoming
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.edges[i])
            .filter(move |e| edge_type.map_or(true, |t| e.edge_type == t))
    }
}

/// Wire shape for serde: nodes plus edges, adjacency rebuilt on decode.
#[derive(Serialize, Deserialize)]
struct GraphWire {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl From<GraphWire> for Graph {
    fn from(wire: GraphWire) -> Self {
        let mut graph = Graph::new();
        for node in wire.nodes {
            graph.add_node(node);
        }
        for edge in wire.edges {
            graph.add_edge(edge);
        }
        graph
    }
}

impl From<Graph> for GraphWire {
    fn from(graph: Graph) -> Self {
        let mut nodes: Vec<Node> = graph.nodes.into_values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        GraphWire {
            nodes,
            edges: graph.edges,
        }
    }
}

/// Overlong ids are truncated with a hash suffix to stay stable and readable.
const MAX_ID_BASE_LEN: usize = 200;

/// Derive the globally unique node id from type, qualified name and file path.
///
/// The id is deterministic so analyzers can re-emit the same entity across
/// ingestion runs and hit the same row.
pub fn compute_node_id(
    node_type: NodeType,
    qualified_name: &str,
    file_path: Option<&str>,
) -> String {
    let base = match file_path {
        Some(path) => format!("{path}:{qualified_name}"),
        None => qualified_name.to_string(),
    };

    if base.len() > MAX_ID_BASE_LEN {
        let digest = blake3::hash(base.as_bytes()).to_hex();
        let suffix = &digest.as_str()[..8];
        let head: String = base.chars().take(180).collect();
        format!("{}:{head}...{suffix}", node_type.as_str())
    } else {
        format!("{}:{base}", node_type.as_str())
    }
}
