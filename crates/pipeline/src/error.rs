//! Error types for the dataflow engine
//!
//! Two families, as distinct as their handling: `PipelineError` covers
//! everything detectable before or at the moment a graph is built or a chunk
//! enters a stream (configuration errors, which abort the run before data
//! collection starts), and `FilterError` covers failures inside a node's run
//! loop (which are fatal to that node and tear the whole graph down).

use meas_types::ShapeError;
use thiserror::Error;

/// Configuration-time errors. None of these are silently corrected.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("node not found: {name}")]
    NodeNotFound { name: String },

    #[error("duplicate node name: {name}")]
    DuplicateNode { name: String },

    #[error("node '{node}' has no port named '{port}'")]
    PortNotFound { node: String, port: String },

    #[error("circular dependency detected in pipeline graph")]
    CircularDependency,

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("descriptor mismatch on '{node}.{port}': upstream dims {upstream:?} vs {bound:?}")]
    DescriptorMismatch {
        node: String,
        port: String,
        upstream: Vec<usize>,
        bound: Vec<usize>,
    },

    #[error("descriptor for '{node}.{port}' was never resolved")]
    DescriptorUnresolved { node: String, port: String },

    #[error("invalid lifecycle transition for node '{node}': {from:?} -> {to:?}")]
    InvalidState {
        node: String,
        from: crate::filter::FilterState,
        to: crate::filter::FilterState,
    },

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("runtime failure in node '{node}': {source}")]
    Runtime {
        node: String,
        #[source]
        source: FilterError,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration-time operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors local to a single node's run loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Push attempted after the stream was marked done.
    #[error("stream closed")]
    StreamClosed,

    /// A chunk was rejected at the stream boundary before entering the queue.
    #[error("bad chunk: {0}")]
    BadChunk(String),

    /// The node observed graph-wide cancellation and unwound.
    #[error("cancelled")]
    Cancelled,

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for FilterError {
    fn from(err: std::io::Error) -> Self {
        FilterError::Io(err.to_string())
    }
}
