//! The filter library: sources, transforms, and sink variants.

pub mod average;
pub mod passthrough;
pub mod plot;
pub mod source;
pub mod writer;

pub use average::Averager;
pub use passthrough::Passthrough;
pub use plot::{LogRenderer, TracePlotter, TraceRenderer};
pub use source::{ExternalSource, SourceHandle, VecSource};
pub use writer::GroupWriter;
