//! Source nodes: where external data enters the graph
//!
//! The engine never interprets instrument protocol. An instrument driver
//! holds a [`SourceHandle`] and feeds raw numeric chunks through it; the
//! [`ExternalSource`] node validates each chunk against the resolved
//! descriptor at the stream boundary and forwards it in order. The feed
//! channel is bounded, so a slow graph backpressures the driver too.

use async_trait::async_trait;
use meas_types::{DataChunk, Descriptor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connector::OutputConnector;
use crate::error::{FilterError, PipelineResult};
use crate::filter::{with_cancel, Filter};
use crate::stream::DEFAULT_CAPACITY;

/// Handle an external producer uses to feed a running graph.
pub struct SourceHandle {
    tx: flume::Sender<Vec<f64>>,
}

impl SourceHandle {
    /// Queue one raw chunk, suspending while the feed is full.
    pub async fn push(&self, samples: Vec<f64>) -> Result<(), FilterError> {
        self.tx
            .send_async(samples)
            .await
            .map_err(|_| FilterError::StreamClosed)
    }

    /// Signal that no more data will ever be produced.
    pub fn finish(self) {}
}

/// A node with no inputs, fed from outside the graph.
pub struct ExternalSource {
    name: String,
    descriptor: Arc<Descriptor>,
    output: OutputConnector,
    feed: flume::Receiver<Vec<f64>>,
}

impl ExternalSource {
    pub fn new(name: impl Into<String>, descriptor: Descriptor) -> (Self, SourceHandle) {
        let name = name.into();
        let (tx, feed) = flume::bounded(DEFAULT_CAPACITY);
        let source = Self {
            output: OutputConnector::new(&name, "out"),
            descriptor: Arc::new(descriptor),
            name,
            feed,
        };
        (source, SourceHandle { tx })
    }

    /// Shape validation at the stream boundary: corrupt chunks never enter
    /// the queue. A chunk is malformed when it is empty or longer than one
    /// complete pass of the declared shape.
    fn validate(&self, samples: &[f64]) -> Result<(), FilterError> {
        if samples.is_empty() {
            return Err(FilterError::BadChunk("empty chunk from producer".into()));
        }
        let pass = self.descriptor.num_points();
        if samples.len() > pass {
            return Err(FilterError::BadChunk(format!(
                "chunk of {} points exceeds one pass of {} points",
                samples.len(),
                pass
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Filter for ExternalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out".to_string()]
    }

    fn output_mut(&mut self, port: &str) -> Option<&mut OutputConnector> {
        (port == "out").then_some(&mut self.output)
    }

    fn update_descriptors(&mut self) -> PipelineResult<()> {
        self.output.set_descriptor(self.descriptor.clone());
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        loop {
            let received = with_cancel(&cancel, self.feed.recv_async()).await?;
            let samples = match received {
                Ok(samples) => samples,
                // Producer dropped its handle: no more data.
                Err(_) => break,
            };
            self.validate(&samples)?;
            with_cancel(&cancel, self.output.push(DataChunk::new(samples))).await??;
        }
        debug!(node = %self.name, "source exhausted");
        Ok(())
    }
}

/// A source that replays a preset buffer in fixed-size chunks.
///
/// Stands in for an instrument in demos and tests, the way the original
/// system's mock instruments did.
pub struct VecSource {
    name: String,
    descriptor: Arc<Descriptor>,
    data: Vec<f64>,
    chunk_size: usize,
    output: OutputConnector,
}

impl VecSource {
    pub fn new(
        name: impl Into<String>,
        descriptor: Descriptor,
        data: Vec<f64>,
        chunk_size: usize,
    ) -> Self {
        let name = name.into();
        Self {
            output: OutputConnector::new(&name, "out"),
            descriptor: Arc::new(descriptor),
            data,
            chunk_size: chunk_size.max(1),
            name,
        }
    }
}

#[async_trait]
impl Filter for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out".to_string()]
    }

    fn output_mut(&mut self, port: &str) -> Option<&mut OutputConnector> {
        (port == "out").then_some(&mut self.output)
    }

    fn update_descriptors(&mut self) -> PipelineResult<()> {
        self.output.set_descriptor(self.descriptor.clone());
        Ok(())
    }

    fn final_init(&mut self) -> PipelineResult<()> {
        let pass = self.descriptor.num_points();
        if self.data.is_empty() || self.data.len() % pass != 0 {
            return Err(meas_types::ShapeError::PointCountMismatch {
                expected: pass,
                got: self.data.len(),
            }
            .into());
        }
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        let data = std::mem::take(&mut self.data);
        for chunk in data.chunks(self.chunk_size) {
            with_cancel(&cancel, self.output.push(DataChunk::new(chunk.to_vec()))).await??;
        }
        Ok(())
    }
}
