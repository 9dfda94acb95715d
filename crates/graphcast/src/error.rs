use thiserror::Error;

use crate::spec::DType;

/// Result type used across the graph store, resolver and passes.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors surfaced by graph construction, resolution and rewrite passes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate name `{name}` in graph `{graph}`")]
    DuplicateName { graph: String, name: String },

    #[error("cannot remove node `{node}`: value `{value}` is still consumed by {consumers:?}")]
    DanglingConsumer {
        node: String,
        value: String,
        consumers: Vec<String>,
    },

    #[error("graph `{graph}` contains a cycle: {}", .cycle.join(" -> "))]
    Cycle { graph: String, cycle: Vec<String> },

    #[error("type inference failed for node `{node}`{}: {reason}", on_value(.value))]
    TypeInference {
        node: String,
        value: Option<String>,
        reason: String,
    },

    #[error("operator `{op}` of node `{node}` is not supported{}", on_backend(.backend))]
    UnsupportedOperator {
        node: String,
        op: String,
        backend: Option<String>,
    },

    #[error("no backend can convert `{value}` from {from} to {to} (tried {tried:?})")]
    NoConversionPath {
        value: String,
        from: DType,
        to: DType,
        tried: Vec<String>,
    },

    #[error("value `{value}` consumed by node `{node}` has no producer and is not a graph input")]
    UndefinedValue { node: String, value: String },

    #[error("graph output `{value}` is never produced")]
    UndefinedOutput { value: String },

    #[error("unknown node id {0}")]
    UnknownNode(u32),

    #[error("unknown value `{0}`")]
    UnknownValue(String),

    #[error("node `{node}` has no input at position {position}")]
    InvalidPosition { node: String, position: usize },

    #[error("graph `{graph}` must be resolved before running `{pass}`")]
    NotResolved { graph: String, pass: String },
}

fn on_value(value: &Option<String>) -> String {
    value
        .as_ref()
        .map(|v| format!(" on value `{v}`"))
        .unwrap_or_default()
}

fn on_backend(backend: &Option<String>) -> String {
    match backend {
        Some(b) => format!(" on backend `{b}`"),
        None => " by any backend".to_string(),
    }
}
