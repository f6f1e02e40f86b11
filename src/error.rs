//! Error types for the query engine

use std::time::Duration;

use thiserror::Error;

use crate::model::value::PropertyKind;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("unknown node type: '{0}'")]
    UnknownNodeType(String),

    /// Never fatal on its own. Surfaced as a structured warning on the plan;
    /// the predicate evaluates over an absent property (always false).
    #[error("unknown property '{property}' on node type '{node_type}'")]
    UnknownProperty { node_type: String, property: String },

    #[error("type mismatch on '{property}': expected {expected}, got {found}")]
    TypeMismatch {
        property: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("traversal limit exceeded: {0}")]
    TraversalLimitExceeded(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

impl QueryError {
    /// Stable error code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } => "SYNTAX_ERROR",
            QueryError::UnknownNodeType(_) => "UNKNOWN_NODE_TYPE",
            QueryError::UnknownProperty { .. } => "UNKNOWN_PROPERTY",
            QueryError::TypeMismatch { .. } => "TYPE_MISMATCH",
            QueryError::TraversalLimitExceeded(_) => "TRAVERSAL_LIMIT_EXCEEDED",
            QueryError::Timeout(_) => "QUERY_TIMEOUT",
            QueryError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            QueryError::NodeNotFound(_) => "NODE_NOT_FOUND",
        }
    }

    /// Whether the caller can recover by adjusting the query or retrying.
    ///
    /// Parse and validation failures are final for a given query text;
    /// traversal/timeout failures respond to narrower DEPTH or a longer
    /// deadline; storage failures have already been retried internally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueryError::TraversalLimitExceeded(_)
                | QueryError::Timeout(_)
                | QueryError::StorageUnavailable(_)
        )
    }
}

// Backend failures surface as STORAGE_UNAVAILABLE so the retry policy in the
// tiered store can treat them uniformly.

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::StorageUnavailable(format!("sqlite: {e}"))
    }
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::StorageUnavailable(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::StorageUnavailable(format!("property encoding: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for QueryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        QueryError::StorageUnavailable(format!("cache encode: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for QueryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        QueryError::StorageUnavailable(format!("cache decode: {e}"))
    }
}
