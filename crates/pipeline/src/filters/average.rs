//! Mean over the outermost sweep axis.

use async_trait::async_trait;
use meas_types::{DataChunk, Descriptor};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connector::{InputConnector, OutputConnector};
use crate::error::{FilterError, PipelineError, PipelineResult};
use crate::filter::{with_cancel, Filter};

/// Averages incoming passes over the outermost axis.
///
/// The output descriptor drops the outermost axis; one inner block (the
/// product of the remaining axis lengths) is accumulated at a time, chunk
/// boundaries free to disagree with block boundaries. The mean over every
/// completed block is emitted as a single chunk when the input completes.
pub struct Averager {
    name: String,
    input: InputConnector,
    output: OutputConnector,
    inner_points: usize,
    block: Vec<f64>,
    acc: Vec<f64>,
    passes: u64,
}

impl Averager {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            input: InputConnector::new(&name, "in"),
            output: OutputConnector::new(&name, "out"),
            name,
            inner_points: 0,
            block: Vec::new(),
            acc: Vec::new(),
            passes: 0,
        }
    }

    fn ingest(&mut self, samples: &[f64]) {
        for &sample in samples {
            self.block.push(sample);
            if self.block.len() == self.inner_points {
                for (sum, value) in self.acc.iter_mut().zip(&self.block) {
                    *sum += value;
                }
                self.passes += 1;
                self.block.clear();
            }
        }
    }
}

#[async_trait]
impl Filter for Averager {
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
        let upstream = self.input.descriptor()?;
        if upstream.num_dims() == 0 {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("'{}' cannot average a zero-axis descriptor", self.name),
            });
        }
        let mut reduced = Descriptor::new();
        for axis in &upstream.axes()[1..] {
            reduced.add_axis(axis.clone());
        }
        reduced.metadata = upstream.metadata.clone();
        self.output.set_descriptor(reduced.into());
        Ok(())
    }

    fn final_init(&mut self) -> PipelineResult<()> {
        self.inner_points = self.output.descriptor()?.num_points();
        self.acc = vec![0.0; self.inner_points];
        self.block = Vec::with_capacity(self.inner_points);
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        while let Some(chunk) = with_cancel(&cancel, self.input.next()).await? {
            self.ingest(&chunk.samples);
        }

        if !self.block.is_empty() {
            return Err(FilterError::BadChunk(format!(
                "stream ended {} point(s) into an inner block of {}",
                self.block.len(),
                self.inner_points
            )));
        }
        if self.passes == 0 {
            return Err(FilterError::BadChunk("no complete pass to average".into()));
        }

        let passes = self.passes as f64;
        let mean: Vec<f64> = self.acc.iter().map(|sum| sum / passes).collect();
        debug!(node = %self.name, passes = self.passes, "emitting averaged block");
        with_cancel(&cancel, self.output.push(DataChunk::new(mean))).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meas_types::Axis;
    use std::sync::Arc;

    fn sweep() -> Descriptor {
        let mut d = Descriptor::new();
        d.add_axis(Axis::scalar("rep", "", vec![0.0, 1.0]).unwrap());
        d.add_axis(Axis::scalar("t", "s", vec![0.0, 0.1, 0.2]).unwrap());
        d
    }

    #[tokio::test]
    async fn averages_across_the_outermost_axis() {
        let mut avg = Averager::new("avg");
        avg.input_mut("in")
            .unwrap()
            .merge_descriptor(Arc::new(sweep()))
            .unwrap();
        avg.update_descriptors().unwrap();
        assert_eq!(avg.output.descriptor().unwrap().dims(), vec![3]);
        avg.final_init().unwrap();

        let mut upstream = OutputConnector::new("src", "out");
        avg.input_mut("in").unwrap().bind(upstream.subscribe(8));
        let downstream = avg.output_mut("out").unwrap().subscribe(8);

        // Two passes of three points, split awkwardly across chunks.
        upstream.push(DataChunk::new(vec![1.0, 2.0])).await.unwrap();
        upstream
            .push(DataChunk::new(vec![3.0, 3.0, 4.0, 5.0]))
            .await
            .unwrap();
        upstream.close();

        avg.run(CancellationToken::new()).await.unwrap();
        avg.output_mut("out").unwrap().close();

        assert_eq!(downstream.next().await.unwrap().samples, vec![2.0, 3.0, 4.0]);
        assert!(downstream.next().await.is_none());
    }

    #[tokio::test]
    async fn partial_trailing_block_is_an_error() {
        let mut avg = Averager::new("avg");
        avg.input_mut("in")
            .unwrap()
            .merge_descriptor(Arc::new(sweep()))
            .unwrap();
        avg.update_descriptors().unwrap();
        avg.final_init().unwrap();

        let mut upstream = OutputConnector::new("src", "out");
        avg.input_mut("in").unwrap().bind(upstream.subscribe(8));

        upstream.push(DataChunk::new(vec![1.0, 2.0])).await.unwrap();
        upstream.close();

        let err = avg.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FilterError::BadChunk(_)));
    }
}
