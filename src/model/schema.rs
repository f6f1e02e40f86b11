//! Advisory property schemas per node type.
//!
//! The schema interprets comparison operators (which literal kinds are legal
//! against which properties) — it never rejects data. Unknown properties are
//! a compatibility guarantee: analyzers may add properties at any time and
//! existing queries keep working, the validator only emits a warning.

use super::value::PropertyKind;
use super::NodeType;

/// Expected kind of a known property on a node type, `None` if the property
/// is not part of the advisory schema.
pub fn property_kind(node_type: NodeType, property: &str) -> Option<PropertyKind> {
    use PropertyKind::*;
    match node_type {
        NodeType::Function => match property {
            "name" | "qualified_name" | "return_type" => Some(Str),
            "line_start" | "line_end" | "complexity" => Some(Int),
            "params" => Some(List),
            _ => None,
        },
        NodeType::Class => match property {
            "name" | "qualified_name" => Some(Str),
            "line_start" | "line_end" => Some(Int),
            "base_classes" | "methods" => Some(List),
            _ => None,
        },
        NodeType::File => match property {
            "path" | "language" => Some(Str),
            "loc" => Some(Int),
            _ => None,
        },
        NodeType::Module => match property {
            "name" | "qualified_name" => Some(Str),
            _ => None,
        },
        NodeType::Variable => match property {
            "name" | "qualified_name" | "type_hint" | "value" => Some(Str),
            _ => None,
        },
    }
}

/// Default allow-list of high-selectivity properties that get dedicated
/// secondary indexes. Configurable via `EngineConfig::indexed_properties`.
pub const DEFAULT_INDEXED_PROPERTIES: &[&str] = &[
    "name",
    "qualified_name",
    "complexity",
    "path",
    "language",
    "loc",
    "line_start",
];
