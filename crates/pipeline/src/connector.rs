//! Named ports binding nodes into the graph
//!
//! Connectors own routing, never data. An `OutputConnector` holds one
//! producer stream per downstream edge and broadcasts every push to all of
//! them in the same order (fan-out). An `InputConnector` reads from one or
//! more upstream streams and completes only when every bound stream is done
//! and fully drained.

use futures::future::select_all;
use meas_types::{DataChunk, Descriptor};
use std::sync::Arc;
use tracing::debug;

use crate::error::{FilterError, PipelineError, PipelineResult};
use crate::stream::{stream, StreamReader, StreamWriter};

/// Output port of a node.
pub struct OutputConnector {
    owner: String,
    port: String,
    descriptor: Option<Arc<Descriptor>>,
    writers: Vec<StreamWriter>,
}

impl OutputConnector {
    pub fn new(owner: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            port: port.into(),
            descriptor: None,
            writers: Vec::new(),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Create a fresh stream for one more downstream edge and hand back its
    /// consumer half. Called once per edge at graph-build time.
    pub fn subscribe(&mut self, capacity: usize) -> StreamReader {
        let (writer, reader) = stream(capacity);
        self.writers.push(writer);
        reader
    }

    pub fn num_edges(&self) -> usize {
        self.writers.len()
    }

    /// Record the resolved descriptor during the propagation pre-pass.
    /// Descriptors are immutable once set.
    pub fn set_descriptor(&mut self, descriptor: Arc<Descriptor>) {
        self.descriptor = Some(descriptor);
    }

    /// The resolved descriptor, or an error if propagation has not reached
    /// this port yet.
    pub fn descriptor(&self) -> PipelineResult<Arc<Descriptor>> {
        self.descriptor
            .clone()
            .ok_or_else(|| PipelineError::DescriptorUnresolved {
                node: self.owner.clone(),
                port: self.port.clone(),
            })
    }

    /// Broadcast a chunk to every downstream stream, verbatim and in push
    /// order. A full branch suspends the whole producer; a closed branch
    /// surfaces as [`FilterError::StreamClosed`].
    pub async fn push(&self, chunk: Arc<DataChunk>) -> Result<(), FilterError> {
        if self.writers.is_empty() {
            debug!(
                node = %self.owner,
                port = %self.port,
                "push on unconnected output port dropped"
            );
            return Ok(());
        }
        for writer in &self.writers {
            writer.push(chunk.clone()).await?;
        }
        Ok(())
    }

    /// Mark every downstream stream done. Idempotent.
    pub fn close(&mut self) {
        for writer in &mut self.writers {
            writer.close();
        }
    }
}

/// Input port of a node.
pub struct InputConnector {
    owner: String,
    port: String,
    descriptor: Option<Arc<Descriptor>>,
    readers: Vec<StreamReader>,
}

impl InputConnector {
    pub fn new(owner: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            port: port.into(),
            descriptor: None,
            readers: Vec::new(),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Bind one more upstream stream to this port.
    pub fn bind(&mut self, reader: StreamReader) {
        self.readers.push(reader);
    }

    pub fn num_streams(&self) -> usize {
        self.readers.len()
    }

    /// Record the descriptor propagated from an upstream output port.
    ///
    /// Several upstream streams may feed one input connector; they must all
    /// agree on `dims()`. The first descriptor wins, a conflicting one is a
    /// configuration error.
    pub fn merge_descriptor(&mut self, descriptor: Arc<Descriptor>) -> PipelineResult<()> {
        match &self.descriptor {
            None => {
                self.descriptor = Some(descriptor);
                Ok(())
            }
            Some(bound) if bound.dims() == descriptor.dims() => Ok(()),
            Some(bound) => Err(PipelineError::DescriptorMismatch {
                node: self.owner.clone(),
                port: self.port.clone(),
                upstream: descriptor.dims(),
                bound: bound.dims(),
            }),
        }
    }

    /// The resolved descriptor, or an error if the propagation pre-pass has
    /// not reached this port yet.
    pub fn descriptor(&self) -> PipelineResult<Arc<Descriptor>> {
        self.descriptor
            .clone()
            .ok_or_else(|| PipelineError::DescriptorUnresolved {
                node: self.owner.clone(),
                port: self.port.clone(),
            })
    }

    /// Receive the next chunk from any bound stream.
    ///
    /// Streams that reach done are dropped from the set as they complete;
    /// `None` means every bound stream is done and drained. No relative
    /// order is guaranteed across streams, only FIFO within each.
    pub async fn next(&mut self) -> Option<Arc<DataChunk>> {
        while !self.readers.is_empty() {
            let finished = {
                let futures: Vec<_> = self
                    .readers
                    .iter()
                    .map(|r| Box::pin(r.next()))
                    .collect();
                let (result, index, _) = select_all(futures).await;
                match result {
                    Some(chunk) => return Some(chunk),
                    None => index,
                }
            };
            self.readers.remove(finished);
        }
        None
    }
}
