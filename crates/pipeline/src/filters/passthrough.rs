//! Descriptor-preserving merge filter.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connector::{InputConnector, OutputConnector};
use crate::error::{FilterError, PipelineResult};
use crate::filter::{with_cancel, Filter};

/// Forwards every chunk from its input port to its output port.
///
/// The input port may be bound to several upstream streams; chunks are
/// merged in arrival order and the node completes once every upstream is
/// done and drained.
pub struct Passthrough {
    name: String,
    input: InputConnector,
    output: OutputConnector,
}

impl Passthrough {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            input: InputConnector::new(&name, "in"),
            output: OutputConnector::new(&name, "out"),
            name,
        }
    }
}

#[async_trait]
impl Filter for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_ports(&self) -> Vec<String> {
        vec!["in".to_string()]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out".to_string()]
    }

    fn input_mut(&mut self, port: &str) -> Option<&mut InputConnector> {
        (port == "in").then_some(&mut self.input)
    }

    fn output_mut(&mut self, port: &str) -> Option<&mut OutputConnector> {
        (port == "out").then_some(&mut self.output)
    }

    fn update_descriptors(&mut self) -> PipelineResult<()> {
        self.output.set_descriptor(self.input.descriptor()?);
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        while let Some(chunk) = with_cancel(&cancel, self.input.next()).await? {
            with_cancel(&cancel, self.output.push(chunk)).await??;
        }
        Ok(())
    }
}
