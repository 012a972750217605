//! Shared types for the measurement dataflow engine
//!
//! This crate contains the data model shared by every part of the system:
//! axes, stream descriptors, and the numeric chunks that flow between
//! pipeline nodes. It is a leaf crate with no runtime dependencies on the
//! engine itself.

pub mod data;

// Re-export commonly used types
pub use data::*;
