//! Durable SQLite backend.
//!
//! Nodes carry their property bag as a JSON column so pushed-down filters
//! can use `json_extract`; edges are a plain relation with source/target
//! indexes. A full `save_graph` replaces the project's rows in one
//! transaction, which is also the atomicity unit readers observe.
//!
//! rusqlite is synchronous, so every connection touch runs on the blocking
//! pool behind a mutex; a single writer at a time is exactly the discipline
//! SQLite wants, and the runtime threads stay free while a statement runs.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{QueryError, Result};
use crate::model::{Edge, EdgeType, Graph, Node, NodeType, Properties, PropertyValue};

use super::{Direction, FilterOp, PropertyFilter, SaveOptions, StorageAdapter};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    project_id TEXT NOT NULL,
    id         TEXT NOT NULL,
    node_type  TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (project_id, id)
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes (project_id, node_type);

CREATE TABLE IF NOT EXISTS edges (
    project_id TEXT NOT NULL,
    source     TEXT NOT NULL,
    target     TEXT NOT NULL,
    edge_type  TEXT NOT NULL,
    properties TEXT NOT NULL,
    weight     REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (project_id, source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (project_id, target);
";

/// Durable graph store on a single SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and the cache-only profile's
    /// durability stub.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run connection work on the blocking pool. Keeping rusqlite off the
    /// runtime threads is what lets a query deadline fire while a statement
    /// is still executing.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| QueryError::StorageUnavailable(format!("blocking task failed: {e}")))?
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
        let id: String = row.get(0)?;
        let node_type: String = row.get(1)?;
        let properties_json: String = row.get(2)?;
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;

        let decode = |what: &str, e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("{what}: {e}").into(),
            )
        };

        Ok(Node {
            id,
            node_type: node_type
                .parse::<NodeType>()
                .map_err(|_| decode("node_type", node_type.clone()))?,
            properties: serde_json::from_str::<Properties>(&properties_json)
                .map_err(|e| decode("properties", e.to_string()))?,
            created_at: created_at
                .parse()
                .map_err(|_| decode("created_at", created_at.clone()))?,
            updated_at: updated_at
                .parse()
                .map_err(|_| decode("updated_at", updated_at.clone()))?,
        })
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
        let source: String = row.get(0)?;
        let target: String = row.get(1)?;
        let edge_type: String = row.get(2)?;
        let properties_json: String = row.get(3)?;
        let weight: f64 = row.get(4)?;

        Ok(Edge {
            source,
            target,
            edge_type: edge_type.parse::<EdgeType>().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("edge_type: {edge_type}").into(),
                )
            })?,
            properties: serde_json::from_str::<Properties>(&properties_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("properties: {e}").into(),
                )
            })?,
            weight,
        })
    }

    /// Ids of the subgraph reachable from `start` within `max_depth` hops
    /// over outgoing edges of any type, including the start itself.
    ///
    /// UNION dedupes on the whole `(id, depth)` row, so a cycle keeps
    /// producing known ids at ever-growing depths. No walk needs more hops
    /// than there are nodes; capping there keeps cyclic graphs finite.
    fn reachable_ids(
        conn: &Connection,
        project_id: &str,
        start: &str,
        max_depth: Option<usize>,
    ) -> Result<Vec<String>> {
        let node_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        let depth_cap = max_depth
            .map(|d| d as i64)
            .unwrap_or(i64::MAX)
            .min(node_count);

        let mut stmt = conn.prepare(
            "WITH RECURSIVE walk(id, depth) AS (
                 SELECT ?2, 0
                 UNION
                 SELECT e.target, w.depth + 1
                   FROM edges e JOIN walk w ON e.source = w.id
                  WHERE e.project_id = ?1 AND w.depth < ?3
             )
             SELECT DISTINCT id FROM walk ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![project_id, start, depth_cap], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

/// Translate a pushed-down filter to a `json_extract` predicate. Numeric
/// comparisons cast so `5` and `5.0` land in the same domain.
fn filter_sql(index: usize, filter: &PropertyFilter) -> Result<(String, Box<dyn rusqlite::ToSql>)> {
    let op = match filter.op {
        FilterOp::Eq => "=",
        FilterOp::Ne => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
    };
    let path = format!("'$.{}'", filter.property.replace('\'', "''"));

    let (lhs, param): (String, Box<dyn rusqlite::ToSql>) = match &filter.value {
        PropertyValue::Str(s) => (
            format!("json_extract(properties, {path})"),
            Box::new(s.clone()),
        ),
        PropertyValue::Int(i) => (
            format!("CAST(json_extract(properties, {path}) AS REAL)"),
            Box::new(*i as f64),
        ),
        PropertyValue::Float(x) => (
            format!("CAST(json_extract(properties, {path}) AS REAL)"),
            Box::new(*x),
        ),
        PropertyValue::Bool(b) => (
            format!("json_extract(properties, {path})"),
            Box::new(*b),
        ),
        PropertyValue::Timestamp(t) => (
            format!("json_extract(properties, {path})"),
            Box::new(t.to_rfc3339()),
        ),
        PropertyValue::List(_) => {
            return Err(QueryError::StorageUnavailable(
                "list values cannot be pushed down as filters".into(),
            ))
        }
    };

    Ok((format!("{lhs} {op} ?{index}"), param))
}

#[async_trait]
impl StorageAdapter for SqliteStore {
    async fn save_graph(
        &self,
        project_id: &str,
        graph: &Graph,
        _opts: &SaveOptions,
    ) -> Result<()> {
        // Serialize rows up front so the blocking closure owns plain data.
        let project_id = project_id.to_string();
        let node_rows: Vec<[String; 5]> = graph
            .nodes()
            .map(|node| {
                Ok([
                    node.id.clone(),
                    node.node_type.as_str().to_string(),
                    serde_json::to_string(&node.properties)?,
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                ])
            })
            .collect::<Result<_>>()?;
        let edge_rows: Vec<(String, String, String, String, f64)> = graph
            .edges()
            .iter()
            .map(|edge| {
                Ok((
                    edge.source.clone(),
                    edge.target.clone(),
                    edge.edge_type.as_str().to_string(),
                    serde_json::to_string(&edge.properties)?,
                    edge.weight,
                ))
            })
            .collect::<Result<_>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM nodes WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM edges WHERE project_id = ?1", params![project_id])?;

            {
                let mut insert_node = tx.prepare(
                    "INSERT INTO nodes (project_id, id, node_type, properties, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (project_id, id) DO UPDATE SET
                         node_type = excluded.node_type,
                         properties = excluded.properties,
                         updated_at = excluded.updated_at",
                )?;
                for [id, node_type, properties, created_at, updated_at] in &node_rows {
                    insert_node.execute(params![
                        project_id, id, node_type, properties, created_at, updated_at
                    ])?;
                }

                let mut insert_edge = tx.prepare(
                    "INSERT INTO edges (project_id, source, target, edge_type, properties, weight)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (source, target, edge_type, properties, weight) in &edge_rows {
                    insert_edge.execute(params![
                        project_id, source, target, edge_type, properties, weight
                    ])?;
                }
            }

            tx.commit()?;
            info!(
                project_id = %project_id,
                nodes = node_rows.len(),
                edges = edge_rows.len(),
                "persisted graph version"
            );
            Ok(())
        })
        .await
    }

    async fn load_graph(
        &self,
        project_id: &str,
        root: Option<&str>,
        max_depth: Option<usize>,
    ) -> Result<Option<Graph>> {
        let project_id = project_id.to_string();
        let root = root.map(str::to_string);

        self.with_conn(move |conn| {
            // Rooted loads scope rows to the reachable id set computed by
            // the recursive CTE; a full load takes everything, dangling
            // edges included. An unknown root answers `None`, same as the
            // cache tier.
            let scope: Option<HashSet<String>> = match &root {
                Some(start) => {
                    let known = conn
                        .query_row(
                            "SELECT 1 FROM nodes WHERE project_id = ?1 AND id = ?2",
                            params![project_id, start],
                            |row| row.get::<_, i64>(0),
                        )
                        .optional()?;
                    if known.is_none() {
                        return Ok(None);
                    }
                    Some(
                        Self::reachable_ids(conn, &project_id, start, max_depth)?
                            .into_iter()
                            .collect(),
                    )
                }
                None => None,
            };
            let in_scope = |id: &str| scope.as_ref().map_or(true, |s| s.contains(id));

            let mut graph = Graph::new();
            let mut node_stmt = conn.prepare(
                "SELECT id, node_type, properties, created_at, updated_at
                   FROM nodes WHERE project_id = ?1 ORDER BY id",
            )?;
            let mut seen = false;
            for node in node_stmt.query_map(params![project_id], Self::row_to_node)? {
                let node = node?;
                seen = true;
                if in_scope(&node.id) {
                    graph.add_node(node);
                }
            }
            if !seen {
                return Ok(None);
            }

            let mut edge_stmt = conn.prepare(
                "SELECT source, target, edge_type, properties, weight
                   FROM edges WHERE project_id = ?1",
            )?;
            for edge in edge_stmt.query_map(params![project_id], Self::row_to_edge)? {
                let edge = edge?;
                if scope.is_none() || (in_scope(&edge.source) && in_scope(&edge.target)) {
                    graph.add_edge(edge);
                }
            }
            Ok(Some(graph))
        })
        .await
    }

    async fn get_node(&self, project_id: &str, node_id: &str) -> Result<Option<Node>> {
        let project_id = project_id.to_string();
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let node = conn
                .query_row(
                    "SELECT id, node_type, properties, created_at, updated_at
                       FROM nodes WHERE project_id = ?1 AND id = ?2",
                    params![project_id, node_id],
                    Self::row_to_node,
                )
                .optional()?;
            Ok(node)
        })
        .await
    }

    async fn query_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
        filters: &[PropertyFilter],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Node>> {
        let project_id = project_id.to_string();
        let filters = filters.to_vec();

        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT id, node_type, properties, created_at, updated_at
                   FROM nodes WHERE project_id = ?1",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id)];

            if let Some(t) = node_type {
                params_vec.push(Box::new(t.as_str().to_string()));
                sql.push_str(&format!(" AND node_type = ?{}", params_vec.len()));
            }
            for filter in &filters {
                let (clause, param) = filter_sql(params_vec.len() + 1, filter)?;
                params_vec.push(param);
                sql.push_str(" AND ");
                sql.push_str(&clause);
            }
            sql.push_str(" ORDER BY id");
            if limit.is_some() || offset > 0 {
                // LIMIT -1 is SQLite's "no limit"; OFFSET requires a LIMIT
                // clause.
                params_vec.push(Box::new(limit.map(|l| l as i64).unwrap_or(-1)));
                sql.push_str(&format!(" LIMIT ?{}", params_vec.len()));
                params_vec.push(Box::new(offset as i64));
                sql.push_str(&format!(" OFFSET ?{}", params_vec.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let nodes = stmt
                .query_map(
                    rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                    Self::row_to_node,
                )?
                .collect::<rusqlite::Result<Vec<Node>>>()?;
            Ok(nodes)
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
        let project_id = project_id.to_string();
        let node_id = node_id.to_string();

        self.with_conn(move |conn| {
            let side = match direction {
                Direction::Outgoing => "source = ?2",
                Direction::Incoming => "target = ?2",
                Direction::Both => "(source = ?2 OR target = ?2)",
            };
            let mut sql = format!(
                "SELECT DISTINCT source, target, edge_type, properties, weight
                   FROM edges WHERE project_id = ?1 AND {side}"
            );
            if edge_type.is_some() {
                sql.push_str(" AND edge_type = ?3");
            }

            let mut stmt = conn.prepare(&sql)?;
            let edges = match edge_type {
                Some(t) => stmt
                    .query_map(params![project_id, node_id, t.as_str()], Self::row_to_edge)?
                    .collect::<rusqlite::Result<Vec<Edge>>>()?,
                None => stmt
                    .query_map(params![project_id, node_id], Self::row_to_edge)?
                    .collect::<rusqlite::Result<Vec<Edge>>>()?,
            };
            Ok(edges)
        })
        .await
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project_id = project_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM nodes WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM edges WHERE project_id = ?1", params![project_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
