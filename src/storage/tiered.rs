//! Two-tier composition of a cache and a durable backend.
//!
//! Reads of single nodes go through the cache and fall back to the durable
//! tier, backfilling on a hit. Set queries and edge lookups go straight to
//! the durable tier; it is authoritative and the cache's TTL could silently
//! shrink a set answer. Writes land in the durable tier first (with retry),
//! then refresh the cache; a cache refresh failure only logs, the durable
//! copy is already safe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::model::{Edge, EdgeType, Graph, Node, NodeType};

use super::{CacheStore, Direction, PropertyFilter, SaveOptions, StorageAdapter};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

pub struct TieredStore {
    cache: CacheStore,
    durable: Arc<dyn StorageAdapter>,
}

impl TieredStore {
    pub fn new(cache: CacheStore, durable: Arc<dyn StorageAdapter>) -> Self {
        TieredStore { cache, durable }
    }

    /// Retry a durable-tier call on transient storage failures with
    /// exponential backoff. Non-storage errors pass through untouched.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(QueryError::StorageUnavailable(reason)) if attempt < RETRY_ATTEMPTS => {
                    warn!(what, attempt, %reason, "durable tier failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop returns on the final attempt");
    }
}

#[async_trait]
impl StorageAdapter for TieredStore {
    async fn save_graph(&self, project_id: &str, graph: &Graph, opts: &SaveOptions) -> Result<()> {
        self.with_retry("save_graph", || {
            self.durable.save_graph(project_id, graph, opts)
        })
        .await?;
        if let Err(e) = self.cache.save_graph(project_id, graph, opts).await {
            warn!(project_id, error = %e, "cache refresh failed after durable save");
        }
        Ok(())
    }

    async fn load_graph(
        &self,
        project_id: &str,
        root: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Option<Graph>> {
        if let Some(graph) = self.cache.load_graph(project_id, root, max_depth).await? {
            debug!(project_id, "graph served from cache");
            return Ok(Some(graph));
        }
        let graph = self
            .with_retry("load_graph", || {
                self.durable.load_graph(project_id, root, max_depth)
            })
            .await?;
        // Only a full load is a faithful cache image; a rooted subgraph
        // would masquerade as the whole project on the next read.
        if root.is_none() {
            if let Some(graph) = &graph {
                if let Err(e) = self
                    .cache
                    .save_graph(project_id, graph, &SaveOptions::default())
                    .await
                {
                    warn!(project_id, error = %e, "cache backfill failed after load");
                }
            }
        }
        Ok(graph)
    }

    async fn get_node(&self, project_id: &str, node_id: &str) -> Result<Option<Node>> {
        if let Some(node) = self.cache.get_node(project_id, node_id).await? {
            return Ok(Some(node));
        }
        let node = self
            .with_retry("get_node", || self.durable.get_node(project_id, node_id))
            .await?;
        if let Some(node) = &node {
            if let Err(e) = self.cache.put_node(project_id, node) {
                warn!(project_id, node_id, error = %e, "cache backfill failed");
            }
        }
        Ok(node)
    }

    async fn query_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
        filters: &[PropertyFilter],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Node>> {
        self.with_retry("query_nodes", || {
            self.durable
                .query_nodes(project_id, node_type, filters, limit, offset)
        })
        .await
    }

    async fn get_edges(
        &self,
        project_id: &str,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        self.with_retry("get_edges", || {
            self.durable.get_edges(project_id, node_id, edge_type, direction)
        })
        .await
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.with_retry("delete_project", || self.durable.delete_project(project_id))
            .await?;
        self.cache.delete_project(project_id).await
    }
}
