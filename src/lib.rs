//! sagegraph — a query engine over semantic code graphs.
//!
//! Codebases are modeled as typed graphs: functions, classes, files, modules
//! and variables connected by CALLING, INHERITS, IMPORTS, CONTAINS,
//! REFERENCES and DEFINES edges. A small FIND-based DSL filters nodes by
//! property and by bounded-depth reachability:
//!
//! ```text
//! FIND function WHERE complexity > 10 AND CALLING 'db.save' DEPTH 2 LIMIT 20
//! ```
//!
//! Queries run through a fixed pipeline (parse, validate, plan, execute)
//! against an immutable per-project snapshot. [`GraphDb`] is the entry
//! point; pick the volatile cache profile with [`GraphDb::in_memory`] or
//! the durable SQLite-backed profile with [`GraphDb::open`].
//!
//! ```no_run
//! use sagegraph::{EngineConfig, GraphDb};
//! use sagegraph::model::Graph;
//!
//! # async fn demo() -> sagegraph::Result<()> {
//! let db = GraphDb::in_memory(EngineConfig::default());
//! db.save_graph("my-project", &Graph::new()).await?;
//! let result = db.execute("my-project", "FIND function WHERE name LIKE 'test_%'").await?;
//! println!("{} matches: {}", result.total, result.plan_summary);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod index;
pub mod model;
pub mod query;
pub mod storage;

pub use db::{EngineConfig, GraphDb, Snapshot};
pub use error::{QueryError, Result};
pub use query::{AggregateResult, AggregateSpec, AggregateValue, QueryOptions, QueryResult};
