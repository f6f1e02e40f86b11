//! In-process cache backend.
//!
//! Each project gets its own key space holding MessagePack-encoded entries
//! under a scheme of `node:{id}`, `type:{type}`, `out:`/`in:` edge lists
//! and a node manifest; node ids contain arbitrary characters, so projects
//! are separated by map nesting, never by key parsing. Every entry carries
//! an optional TTL and expires lazily on read. The whole store is volatile;
//! it implements the full adapter contract so it can serve alone in the
//! cache profile or as the fast tier of a
//! [`TieredStore`](super::TieredStore).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::model::{Edge, EdgeType, Graph, Node, NodeType};

use super::{Direction, PropertyFilter, SaveOptions, StorageAdapter};

struct Entry {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

const MANIFEST_KEY: &str = "nodes";

/// Volatile MessagePack cache with per-entry TTL, one key space per project.
pub struct CacheStore {
    projects: RwLock<HashMap<String, HashMap<String, Entry>>>,
    ttl: Option<Duration>,
}

impl CacheStore {
    /// A cache whose entries never expire.
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        CacheStore {
            projects: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn node_key(node_id: &str) -> String {
        format!("node:{node_id}")
    }

    fn type_key(node_type: NodeType) -> String {
        format!("type:{node_type}")
    }

    fn out_key(node_id: &str) -> String {
        format!("out:{node_id}")
    }

    fn in_key(node_id: &str) -> String {
        format!("in:{node_id}")
    }

    fn set<T: Serialize>(&self, project_id: &str, key: String, value: &T) -> Result<()> {
        self.set_with(project_id, key, value, self.ttl)
    }

    fn set_with<T: Serialize>(
        &self,
        project_id: &str,
        key: String,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = rmp_serde::to_vec(value)?;
        let mut projects = self
            .projects
            .write()
            .map_err(|_| QueryError::StorageUnavailable("cache lock poisoned".into()))?;
        projects.entry(project_id.to_string()).or_default().insert(
            key,
            Entry {
                payload,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, project_id: &str, key: &str) -> Result<Option<T>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| QueryError::StorageUnavailable("cache lock poisoned".into()))?;
        match projects.get(project_id).and_then(|entries| entries.get(key)) {
            Some(entry) if !entry.is_expired() => {
                Ok(Some(rmp_serde::from_slice(&entry.payload)?))
            }
            _ => Ok(None),
        }
    }

    /// Backfill one node after a durable-tier read.
    pub(crate) fn put_node(&self, project_id: &str, node: &Node) -> Result<()> {
        self.set(project_id, Self::node_key(&node.id), node)
    }

    fn remove_project_keys(&self, project_id: &str) -> Result<()> {
        let mut projects = self
            .projects
            .write()
            .map_err(|_| QueryError::StorageUnavailable("cache lock poisoned".into()))?;
        projects.remove(project_id);
        Ok(())
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for CacheStore {
    async fn save_graph(&self, project_id: &str, graph: &Graph, opts: &SaveOptions) -> Result<()> {
        // Full replace: stale keys from a previous version must not survive.
        self.remove_project_keys(project_id)?;
        let ttl = opts.ttl.or(self.ttl);

        let mut by_type: HashMap<NodeType, Vec<String>> = HashMap::new();
        let mut manifest: Vec<String> = Vec::with_capacity(graph.node_count());

        for node in graph.nodes() {
            self.set_with(project_id, Self::node_key(&node.id), node, ttl)?;
            by_type.entry(node.node_type).or_default().push(node.id.clone());
            manifest.push(node.id.clone());
        }
        manifest.sort();
        self.set_with(project_id, MANIFEST_KEY.to_string(), &manifest, ttl)?;

        for (node_type, mut ids) in by_type {
            ids.sort();
            self.set_with(project_id, Self::type_key(node_type), &ids, ttl)?;
        }

        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        let mut incoming: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in graph.edges() {
            outgoing.entry(&edge.source).or_default().push(edge);
            incoming.entry(&edge.target).or_default().push(edge);
        }
        for (id, edges) in outgoing {
            self.set_with(project_id, Self::out_key(id), &edges, ttl)?;
        }
        for (id, edges) in incoming {
            self.set_with(project_id, Self::in_key(id), &edges, ttl)?;
        }

        debug!(
            project_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "cached graph version"
        );
        Ok(())
    }

    async fn load_graph(
        &self,
        project_id: &str,
        root: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Option<Graph>> {
        let Some(manifest) = self.get::<Vec<String>>(project_id, MANIFEST_KEY)? else {
            return Ok(None);
        };

        let wanted: Vec<String> = match root {
            None => manifest,
            // Subgraph load: BFS over the cached adjacency lists.
            Some(root) => {
                if !manifest.iter().any(|id| id == root) {
                    return Ok(None);
                }
                let mut visited = std::collections::BTreeSet::new();
                visited.insert(root.to_string());
                let mut frontier = vec![root.to_string()];
                let mut depth = 0usize;
                while !frontier.is_empty() && max_depth.map_or(true, |d| depth < d) {
                    let mut next = Vec::new();
                    for id in frontier {
                        let edges = self
                            .get::<Vec<Edge>>(project_id, &Self::out_key(&id))?
                            .unwrap_or_default();
                        for edge in edges {
                            if visited.insert(edge.target.clone()) {
                                next.push(edge.target);
                            }
                        }
                    }
                    frontier = next;
                    depth += 1;
                }
                visited.into_iter().collect()
            }
        };

        let mut graph = Graph::new();
        for id in &wanted {
            // Partial expiry invalidates the whole cached answer.
            let Some(node) = self.get::<Node>(project_id, &Self::node_key(id))? else {
                debug!(project_id, node_id = %id, "cache entry expired mid-load");
                return Ok(None);
            };
            graph.add_node(node);
        }
        for id in &wanted {
            if let Some(edges) = self.get::<Vec<Edge>>(project_id, &Self::out_key(id))? {
                for edge in edges {
                    // Rooted loads keep only edges inside the subgraph; full
                    // loads keep everything, dangling edges included.
                    if root.is_none() || graph.has_node(&edge.target) {
                        graph.add_edge(edge);
                    }
                }
            }
        }
        Ok(Some(graph))
    }

    async fn get_node(&self, project_id: &str, node_id: &str) -> Result<Option<Node>> {
        self.get(project_id, &Self::node_key(node_id))
    }

    async fn query_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
        filters: &[PropertyFilter],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Node>> {
        // Type and manifest lists are stored sorted, so the window is stable.
        let ids: Vec<String> = match node_type {
            Some(t) => self
                .get::<Vec<String>>(project_id, &Self::type_key(t))?
                .unwrap_or_default(),
            None => self
                .get::<Vec<String>>(project_id, MANIFEST_KEY)?
                .unwrap_or_default(),
        };

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for id in ids {
            if let Some(node) = self.get::<Node>(project_id, &Self::node_key(&id))? {
                if filters.iter().all(|f| f.matches(&node)) {
                    if skipped < offset {
                        skipped += 1;
                        continue;
                    }
                    out.push(node);
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    async fn get_edges(
        &self,
        project_id: &str,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        let mut out: Vec<Edge> = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            out.extend(
                self.get::<Vec<Edge>>(project_id, &Self::out_key(node_id))?
                    .unwrap_or_default(),
            );
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            let incoming = self
                .get::<Vec<Edge>>(project_id, &Self::in_key(node_id))?
                .unwrap_or_default();
            // A self-loop appears in both lists; keep one copy.
            for edge in incoming {
                if !(edge.source == node_id && edge.target == node_id && direction == Direction::Both)
                {
                    out.push(edge);
                }
            }
        }
        if let Some(t) = edge_type {
            out.retain(|e| e.edge_type == t);
        }
        Ok(out)
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.remove_project_keys(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Properties, PropertyValue};
    use crate::storage::FilterOp;

    fn node(id: &str, node_type: NodeType, name: &str) -> Node {
        let mut props = Properties::new();
        props.insert("name".into(), PropertyValue::Str(name.into()));
        Node::new(id, node_type, props)
    }

    fn sample_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(node("f:a", NodeType::Function, "a"));
        g.add_node(node("f:b", NodeType::Function, "b"));
        g.add_node(node("c:x", NodeType::Class, "X"));
        g.add_edge(Edge::new("f:a", "f:b", EdgeType::Calling));
        g.add_edge(Edge::new("c:x", "f:a", EdgeType::Contains));
        g
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        let loaded = store.load_graph("p1", None, None).await.unwrap().unwrap();
        assert_eq!(loaded.node_count(), 3);
        assert_eq!(loaded.edge_count(), 2);
        assert!(store.load_graph("p2", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_point_reads_and_type_queries() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        let n = store.get_node("p1", "f:a").await.unwrap().unwrap();
        assert_eq!(n.name(), Some("a"));
        assert!(store.get_node("p1", "f:zzz").await.unwrap().is_none());

        let functions = store
            .query_nodes("p1", Some(NodeType::Function), &[], None, 0)
            .await
            .unwrap();
        assert_eq!(functions.len(), 2);

        let named_b = store
            .query_nodes(
                "p1",
                Some(NodeType::Function),
                &[PropertyFilter::new(
                    "name",
                    FilterOp::Eq,
                    PropertyValue::Str("b".into()),
                )],
                None,
                0,
            )
            .await
            .unwrap();
        assert_eq!(named_b.len(), 1);
        assert_eq!(named_b[0].id, "f:b");
    }

    #[tokio::test]
    async fn test_rooted_load_scopes_to_subgraph() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        // From c:x everything is reachable; from f:b nothing further is.
        let from_class = store
            .load_graph("p1", Some("c:x"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from_class.node_count(), 3);
        assert_eq!(from_class.edge_count(), 2);

        let leaf = store
            .load_graph("p1", Some("f:b"), Some(4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leaf.node_count(), 1);
        assert_eq!(leaf.edge_count(), 0);

        assert!(store
            .load_graph("p1", Some("missing"), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_edge_directions() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        let out = store
            .get_edges("p1", "f:a", None, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, "f:b");

        let incoming = store
            .get_edges("p1", "f:a", Some(EdgeType::Contains), Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, "c:x");

        let both = store
            .get_edges("p1", "f:a", None, Direction::Both)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_version() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        let mut smaller = Graph::new();
        smaller.add_node(node("f:only", NodeType::Function, "only"));
        store.save_graph("p1", &smaller, &SaveOptions::default()).await.unwrap();

        assert!(store.get_node("p1", "f:a").await.unwrap().is_none());
        let loaded = store.load_graph("p1", None, None).await.unwrap().unwrap();
        assert_eq!(loaded.node_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = CacheStore::with_ttl(Some(Duration::from_millis(20)));
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();
        assert!(store.get_node("p1", "f:a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get_node("p1", "f:a").await.unwrap().is_none());
        assert!(store.load_graph("p1", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_colon_heavy_ids_stay_in_their_project() {
        // Node ids routinely embed a project name and colons; writing one
        // project must never touch entries whose ids mention another.
        let store = CacheStore::new();

        let mut other = Graph::new();
        other.add_node(node("function:p1:main", NodeType::Function, "main"));
        store.save_graph("other", &other, &SaveOptions::default()).await.unwrap();

        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();

        let kept = store.get_node("other", "function:p1:main").await.unwrap();
        assert!(kept.is_some());
        assert_eq!(
            store.load_graph("other", None, None).await.unwrap().unwrap().node_count(),
            1
        );

        store.delete_project("p1").await.unwrap();
        assert!(store.get_node("other", "function:p1:main").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_project_is_scoped() {
        let store = CacheStore::new();
        store.save_graph("p1", &sample_graph(), &SaveOptions::default()).await.unwrap();
        store.save_graph("p2", &sample_graph(), &SaveOptions::default()).await.unwrap();

        store.delete_project("p1").await.unwrap();
        assert!(store.load_graph("p1", None, None).await.unwrap().is_none());
        assert!(store.load_graph("p2", None, None).await.unwrap().is_some());
    }
}
