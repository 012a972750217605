//! File sink
//!
//! Accumulates every sample from its input and, once the input is done and
//! drained, persists one channel group (shape, axes, column data, metadata)
//! to disk. Chunk boundaries are irrelevant; only the final flat column is
//! checked against the descriptor, and it must hold a whole number of
//! passes.

use async_trait::async_trait;
use chrono::Utc;
use meas_types::Descriptor;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connector::InputConnector;
use crate::error::{FilterError, PipelineResult};
use crate::filter::{with_cancel, Filter};
use crate::store::{write_groups, ChannelGroup};

pub struct GroupWriter {
    name: String,
    input: InputConnector,
    path: PathBuf,
    group: String,
    column: String,
    descriptor: Option<Arc<Descriptor>>,
    buffer: Vec<f64>,
}

impl GroupWriter {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        group: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            input: InputConnector::new(name.clone(), "in"),
            name,
            path: path.into(),
            group: group.into(),
            column: "data".to_string(),
            descriptor: None,
            buffer: Vec::new(),
        }
    }

    /// Name of the stored data column (defaults to `data`).
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn write(&mut self) -> Result<(), FilterError> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| FilterError::Fatal("writer ran without a resolved descriptor".into()))?;

        let mut annotated = Descriptor::clone(descriptor);
        annotated
            .metadata
            .insert("saved_at".into(), Utc::now().to_rfc3339().into());

        let mut data = BTreeMap::new();
        data.insert(self.column.clone(), std::mem::take(&mut self.buffer));
        let group = ChannelGroup::from_descriptor(&annotated, data)?;

        let mut groups = BTreeMap::new();
        groups.insert(self.group.clone(), group);
        write_groups(&self.path, &groups).map_err(|e| FilterError::Io(e.to_string()))?;
        info!(
            node = %self.name,
            path = %self.path.display(),
            group = %self.group,
            "channel group persisted"
        );
        Ok(())
    }
}

#[async_trait]
impl Filter for GroupWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_ports(&self) -> Vec<String> {
        vec!["in".to_string()]
    }

    fn input_mut(&mut self, port: &str) -> Option<&mut InputConnector> {
        (port == "in").then_some(&mut self.input)
    }

    fn update_descriptors(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    fn final_init(&mut self) -> PipelineResult<()> {
        self.descriptor = Some(self.input.descriptor()?);
        self.buffer.clear();
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        while let Some(chunk) = with_cancel(&cancel, self.input.next()).await? {
            debug!(node = %self.name, samples = chunk.len(), "buffering chunk");
            self.buffer.extend_from_slice(&chunk.samples);
        }
        self.write()
    }
}
