//! End-to-end engine tests: the public GraphDb surface over both storage
//! profiles, pagination laws, traversal termination and error taxonomy.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use sagegraph::model::{Edge, EdgeType, Graph, Node, NodeType, Properties, PropertyValue};
use sagegraph::storage::{CacheStore, SaveOptions, SqliteStore, StorageAdapter};
use sagegraph::{
    AggregateResult, AggregateSpec, AggregateValue, EngineConfig, GraphDb, QueryOptions,
};

fn function(id: &str, name: &str, complexity: i64) -> Node {
    let mut props = Properties::new();
    props.insert("name".into(), PropertyValue::Str(name.into()));
    props.insert("complexity".into(), PropertyValue::Int(complexity));
    Node::new(id, NodeType::Function, props)
}

/// The three-function graph used throughout: main(3) -> helper(12) -> util(20).
fn reference_graph() -> Graph {
    let mut g = Graph::new();
    g.add_node(function("f:main", "main", 3));
    g.add_node(function("f:helper", "helper", 12));
    g.add_node(function("f:util", "util", 20));
    g.add_edge(Edge::new("f:main", "f:helper", EdgeType::Calling));
    g.add_edge(Edge::new("f:helper", "f:util", EdgeType::Calling));
    g
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn in_memory_db() -> GraphDb {
    init_tracing();
    let db = GraphDb::in_memory(EngineConfig::default());
    db.save_graph("p", &reference_graph()).await.unwrap();
    db
}

#[tokio::test]
async fn complexity_filter_returns_id_ordered_matches() {
    let db = in_memory_db().await;
    let r = db.execute("p", "FIND function WHERE complexity > 10").await.unwrap();
    let ids: Vec<&str> = r.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["f:helper", "f:util"]);
    assert_eq!(r.total, 2);
}

#[tokio::test]
async fn limit_one_keeps_exact_total() {
    let db = in_memory_db().await;
    let r = db
        .execute("p", "FIND function WHERE complexity > 10 LIMIT 1")
        .await
        .unwrap();
    assert_eq!(r.nodes.len(), 1);
    assert_eq!(r.nodes[0].id, "f:helper"); // lower id of the two matches
    assert_eq!(r.total, 2);
}

#[tokio::test]
async fn direct_callers_only() {
    let db = in_memory_db().await;
    let r = db.execute("p", "FIND function WHERE CALLING 'helper'").await.unwrap();
    let ids: Vec<&str> = r.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["f:main"]);
}

#[tokio::test]
async fn unknown_node_type_fails_before_execution() {
    let db = in_memory_db().await;
    let err = db.execute("p", "FIND widget").await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_NODE_TYPE");
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn type_mismatch_fails_at_validation() {
    let db = in_memory_db().await;
    let err = db
        .execute("p", "FIND function WHERE complexity > 'high'")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TYPE_MISMATCH");
}

#[tokio::test]
async fn bare_find_equals_type_membership() {
    let db = in_memory_db().await;
    let r = db.execute("p", "FIND function").await.unwrap();
    let ids: Vec<&str> = r.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["f:helper", "f:main", "f:util"]);
    assert_eq!(r.total, 3);

    let capped = db.execute("p", "FIND function LIMIT 2").await.unwrap();
    assert_eq!(capped.nodes.len(), 2);
    assert_eq!(capped.total, 3);
}

#[tokio::test]
async fn repeated_execution_is_idempotent() {
    let db = in_memory_db().await;
    let query = "FIND function WHERE complexity > 5 LIMIT 10";
    let first = db.execute("p", query).await.unwrap();
    let second = db.execute("p", query).await.unwrap();
    assert_eq!(first.total, second.total);
    let a: Vec<&str> = first.nodes.iter().map(|n| n.id.as_str()).collect();
    let b: Vec<&str> = second.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(a, b);
}

#[tokio::test]
async fn cyclic_traversal_terminates_and_deduplicates() {
    let db = GraphDb::in_memory(EngineConfig::default());
    let mut g = Graph::new();
    g.add_node(function("f:a", "A", 1));
    g.add_node(function("f:b", "B", 1));
    g.add_edge(Edge::new("f:a", "f:b", EdgeType::Calling));
    g.add_edge(Edge::new("f:b", "f:a", EdgeType::Calling));
    db.save_graph("p", &g).await.unwrap();

    // B reaches A directly; A reaches A around the cycle. Each exactly once.
    let r = db
        .execute("p", "FIND function WHERE CALLING 'A' DEPTH 5")
        .await
        .unwrap();
    let ids: Vec<&str> = r.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["f:a", "f:b"]);
}

#[tokio::test]
async fn like_prefix_and_single_char_wildcards() {
    let db = GraphDb::in_memory(EngineConfig::default());
    let mut g = Graph::new();
    g.add_node(function("f:1", "test_parse", 1));
    g.add_node(function("f:2", "test", 1));
    g.add_node(function("f:3", "testy", 1));
    g.add_node(function("f:4", "contest_run", 1));
    db.save_graph("p", &g).await.unwrap();

    let r = db
        .execute("p", "FIND function WHERE name LIKE 'test_%'")
        .await
        .unwrap();
    let ids: Vec<&str> = r.nodes.iter().map(|n| n.id.as_str()).collect();
    // '_' consumes exactly one character: "test" is too short, "testy" has
    // nothing after the fifth character but still matches via empty '%'.
    assert_eq!(ids, vec!["f:1", "f:3"]);
}

#[tokio::test]
async fn round_trip_is_lossless_on_both_backends() {
    let graph = reference_graph();
    let backends: Vec<Arc<dyn StorageAdapter>> = vec![
        Arc::new(CacheStore::new()),
        Arc::new(SqliteStore::open_in_memory().unwrap()),
    ];

    for store in backends {
        store
            .save_graph("p", &graph, &SaveOptions::default())
            .await
            .unwrap();
        let mut nodes = store
            .query_nodes("p", Some(NodeType::Function), &[], None, 0)
            .await
            .unwrap();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f:helper", "f:main", "f:util"]);
    }
}

#[tokio::test]
async fn durable_profile_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    {
        let db = GraphDb::open(&path, EngineConfig::default()).unwrap();
        db.save_graph("p", &reference_graph()).await.unwrap();
    }

    // Fresh process view: nothing in memory, everything in the file.
    let db = GraphDb::open(&path, EngineConfig::default()).unwrap();
    let r = db.execute("p", "FIND function WHERE complexity > 10").await.unwrap();
    assert_eq!(r.total, 2);
}

/// Delays point reads so a query reliably overruns a short deadline.
struct SlowStore {
    inner: CacheStore,
    delay: Duration,
}

#[async_trait::async_trait]
impl StorageAdapter for SlowStore {
    async fn save_graph(
        &self,
        project_id: &str,
        graph: &Graph,
        opts: &SaveOptions,
    ) -> sagegraph::Result<()> {
        self.inner.save_graph(project_id, graph, opts).await
    }

    async fn load_graph(
        &self,
        project_id: &str,
        root: Option<&str>,
        max_depth: Option<usize>,
    ) -> sagegraph::Result<Option<Graph>> {
        self.inner.load_graph(project_id, root, max_depth).await
    }

    async fn get_node(&self, project_id: &str, node_id: &str) -> sagegraph::Result<Option<Node>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_node(project_id, node_id).await
    }

    async fn query_nodes(
        &self,
        project_id: &str,
        node_type: Option<NodeType>,
        filters: &[sagegraph::storage::PropertyFilter],
        limit: Option<usize>,
        offset: usize,
    ) -> sagegraph::Result<Vec<Node>> {
        self.inner
            .query_nodes(project_id, node_type, filters, limit, offset)
            .await
    }

    async fn get_edges(
        &self,
        project_id: &str,
        node_id: &str,
        edge_type: Option<EdgeType>,
        direction: sagegraph::storage::Direction,
    ) -> sagegraph::Result<Vec<Edge>> {
        self.inner
            .get_edges(project_id, node_id, edge_type, direction)
            .await
    }

    async fn delete_project(&self, project_id: &str) -> sagegraph::Result<()> {
        self.inner.delete_project(project_id).await
    }
}

#[tokio::test]
async fn query_timeout_is_reported_as_such() {
    let config = EngineConfig {
        query_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let store = Arc::new(SlowStore {
        inner: CacheStore::new(),
        delay: Duration::from_millis(200),
    });
    let db = GraphDb::with_store(store, config);
    db.save_graph("p", &reference_graph()).await.unwrap();

    let err = db.execute("p", "FIND function").await.unwrap_err();
    assert_eq!(err.code(), "QUERY_TIMEOUT");
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn exists_and_aggregation_compose() {
    let db = in_memory_db().await;
    let r = db
        .execute_with(
            "p",
            "FIND function WHERE EXISTS (FIND function WHERE complexity > 15)",
            &QueryOptions {
                aggregate: Some(AggregateSpec::Sum("complexity".into())),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    // The uncorrelated subquery holds, so every function matches.
    assert_eq!(r.total, 3);
    assert_eq!(
        r.aggregate,
        Some(AggregateResult::Single(AggregateValue::Sum(35.0)))
    );
}

/// Build a graph of `n` functions with deterministic ids and complexities.
fn synthetic_graph(n: usize) -> Graph {
    let mut g = Graph::new();
    for i in 0..n {
        g.add_node(function(
            &format!("f:{i:03}"),
            &format!("fn{i:03}"),
            (i % 7) as i64,
        ));
    }
    g
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// result(0,k) ++ result(k,m) == result(0,k+m) for any window sizes.
    #[test]
    fn pagination_partition_law(n in 1usize..40, k in 0usize..50, m in 0usize..50) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let db = GraphDb::in_memory(EngineConfig::default());
            db.save_graph("p", &synthetic_graph(n)).await.unwrap();

            let head = db
                .execute("p", &format!("FIND function LIMIT {k}"))
                .await
                .unwrap();
            let tail = db
                .execute("p", &format!("FIND function LIMIT {m} OFFSET {k}"))
                .await
                .unwrap();
            let window = db
                .execute("p", &format!("FIND function LIMIT {}", k + m))
                .await
                .unwrap();

            let mut combined: Vec<String> =
                head.nodes.iter().map(|n| n.id.clone()).collect();
            combined.extend(tail.nodes.iter().map(|n| n.id.clone()));
            let expected: Vec<String> =
                window.nodes.iter().map(|n| n.id.clone()).collect();

            prop_assert_eq!(combined, expected);
            prop_assert_eq!(head.total, n);
            prop_assert_eq!(tail.total, n);
            Ok(())
        })?;
    }
}
