//! Streaming measurement pipeline
//!
//! This crate implements a dataflow graph (DAG) for streaming measurement
//! data: nodes exchange flat sample chunks over bounded streams, data shape
//! travels separately as per-stream descriptors resolved in a topological
//! pre-pass, and the whole graph runs as one cooperatively scheduled task
//! per node with first-failure cancellation.

pub mod config;
pub mod connector;
pub mod error;
pub mod filter;
pub mod filters;
pub mod graph;
pub mod store;
pub mod stream;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::*;
pub use connector::*;
pub use error::*;
pub use filter::*;
pub use filters::*;
pub use graph::*;
pub use store::*;
pub use stream::*;
