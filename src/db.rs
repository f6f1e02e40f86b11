//! Engine façade: per-project graph versions, index lifecycle and the
//! public execute path.
//!
//! Every `save_graph` persists the graph, rebuilds the full index set and
//! swaps one `Arc<Snapshot>` pointer. Queries clone that pointer up front
//! and run entirely against it, so a save landing mid-query never mixes two
//! versions into one answer. Writers serialize per project behind an async
//! mutex; readers never block.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::{QueryError, Result};
use crate::index::IndexSet;
use crate::model::{schema, Graph, Node};
use crate::query::exec::{self, ExecContext, QueryOptions, QueryResult};
use crate::query::parser;
use crate::storage::{CacheStore, SaveOptions, SqliteStore, StorageAdapter, TieredStore};

/// Engine-wide tunables. The defaults match a mid-sized codebase graph
/// (tens of thousands of nodes).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on DEPTH in relationship conditions.
    pub max_traversal_depth: usize,
    /// Ceiling on nodes visited by a single traversal before it aborts.
    pub max_visited_nodes: usize,
    /// Maximum EXISTS nesting.
    pub max_subquery_depth: usize,
    /// Concurrent node fetches during hydration.
    pub hydration_concurrency: usize,
    /// Wall-clock budget for one query.
    pub query_timeout: Duration,
    /// Properties that get secondary indexes on rebuild.
    pub indexed_properties: Vec<String>,
    /// TTL for cache-tier entries; `None` means entries never expire.
    pub cache_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_traversal_depth: 32,
            max_visited_nodes: 100_000,
            max_subquery_depth: 4,
            hydration_concurrency: 8,
            query_timeout: Duration::from_secs(30),
            indexed_properties: schema::DEFAULT_INDEXED_PROPERTIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cache_ttl: None,
        }
    }
}

/// One immutable graph version: the indexes plus a monotonic version number.
/// Swapped atomically as a whole; queries hold an `Arc` to exactly one.
pub struct Snapshot {
    pub version: u64,
    pub indexes: IndexSet,
}

struct ProjectState {
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
    next_version: AtomicU64,
}

impl ProjectState {
    fn empty() -> Self {
        ProjectState {
            snapshot: RwLock::new(Arc::new(Snapshot {
                version: 0,
                indexes: IndexSet::default(),
            })),
            write_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn install(&self, indexes: IndexSet) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(Snapshot { version, indexes });
        version
    }
}

/// Tracks every project the engine has touched this process.
#[derive(Default)]
struct ProjectRegistry {
    projects: RwLock<HashMap<String, Arc<ProjectState>>>,
}

impl ProjectRegistry {
    fn get_or_create(&self, project_id: &str) -> Arc<ProjectState> {
        if let Some(state) = self
            .projects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(project_id)
        {
            return state.clone();
        }
        let mut projects = self.projects.write().unwrap_or_else(|p| p.into_inner());
        projects
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(ProjectState::empty()))
            .clone()
    }

    fn get(&self, project_id: &str) -> Option<Arc<ProjectState>> {
        self.projects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(project_id)
            .cloned()
    }

    fn remove(&self, project_id: &str) {
        self.projects
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(project_id);
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .projects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// The query engine. One instance serves any number of projects against a
/// single storage profile.
pub struct GraphDb {
    config: EngineConfig,
    store: Arc<dyn StorageAdapter>,
    registry: ProjectRegistry,
}

impl GraphDb {
    /// Cache-only profile: fast, volatile, no durable tier.
    pub fn in_memory(config: EngineConfig) -> GraphDb {
        let store: Arc<dyn StorageAdapter> = Arc::new(CacheStore::with_ttl(config.cache_ttl));
        GraphDb {
            config,
            store,
            registry: ProjectRegistry::default(),
        }
    }

    /// Durable profile: SQLite under a read-through cache.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<GraphDb> {
        let durable: Arc<dyn StorageAdapter> = Arc::new(SqliteStore::open(path)?);
        let cache = CacheStore::with_ttl(config.cache_ttl);
        Ok(GraphDb {
            config,
            store: Arc::new(TieredStore::new(cache, durable)),
            registry: ProjectRegistry::default(),
        })
    }

    /// Any adapter composition the caller assembled.
    pub fn with_store(store: Arc<dyn StorageAdapter>, config: EngineConfig) -> GraphDb {
        GraphDb {
            config,
            store,
            registry: ProjectRegistry::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist a new graph version for a project and rebuild its indexes.
    /// Returns the installed version number.
    pub async fn save_graph(&self, project_id: &str, graph: &Graph) -> Result<u64> {
        let state = self.registry.get_or_create(project_id);
        let _write = state.write_lock.lock().await;

        let opts = SaveOptions {
            ttl: self.config.cache_ttl,
        };
        self.store.save_graph(project_id, graph, &opts).await?;
        let indexes = IndexSet::build(graph, &self.config.indexed_properties);
        let version = state.install(indexes);

        info!(
            project_id,
            version,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "installed graph version"
        );
        Ok(version)
    }

    /// Bring a project already present in storage into memory. No-op when
    /// the project has a live snapshot; `Ok(false)` when storage has never
    /// seen it either.
    pub async fn load_project(&self, project_id: &str) -> Result<bool> {
        if let Some(state) = self.registry.get(project_id) {
            if state.current().version > 0 {
                return Ok(true);
            }
        }
        let Some(graph) = self.store.load_graph(project_id, None, None).await? else {
            return Ok(false);
        };
        let state = self.registry.get_or_create(project_id);
        let _write = state.write_lock.lock().await;
        let indexes = IndexSet::build(&graph, &self.config.indexed_properties);
        let version = state.install(indexes);
        info!(project_id, version, "loaded project from storage");
        Ok(true)
    }

    /// Parse, plan and run one query against the project's current version.
    pub async fn execute(&self, project_id: &str, query_text: &str) -> Result<QueryResult> {
        self.execute_with(project_id, query_text, &QueryOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        project_id: &str,
        query_text: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let query = parser::parse(query_text)?;

        // Lazily hydrate projects saved by an earlier process.
        if self.registry.get(project_id).is_none() {
            self.load_project(project_id).await?;
        }
        let snapshot = self.registry.get_or_create(project_id).current();

        let ctx = ExecContext {
            project_id,
            config: &self.config,
            index: &snapshot.indexes,
            store: self.store.as_ref(),
        };
        match tokio::time::timeout(self.config.query_timeout, exec::execute(ctx, &query, options))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.config.query_timeout)),
        }
    }

    /// Point lookup of one node.
    pub async fn get_node(&self, project_id: &str, node_id: &str) -> Result<Node> {
        self.store
            .get_node(project_id, node_id)
            .await?
            .ok_or_else(|| QueryError::NodeNotFound(node_id.to_string()))
    }

    /// Drop a project from storage and from memory.
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.store.delete_project(project_id).await?;
        self.registry.remove(project_id);
        Ok(())
    }

    /// Projects with a live snapshot, sorted.
    pub fn projects(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Current snapshot version for a project (0 before any save).
    pub fn version(&self, project_id: &str) -> u64 {
        self.registry
            .get(project_id)
            .map(|s| s.current().version)
            .unwrap_or(0)
    }
}
