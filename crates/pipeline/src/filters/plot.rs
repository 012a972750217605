//! Renderer-backed coalescing sink
//!
//! Chunks arrive with arbitrary sizes; the plotter reassembles them into
//! whole traces (the innermost axis) or whole frames (the innermost two
//! axes) and hands each one to a [`TraceRenderer`] as it completes. Any
//! leftover tail carries forward into the next window, never dropped or
//! duplicated, so numeric continuity survives chunk boundaries that do not
//! align with trace boundaries. `present` calls (the expensive external
//! update) are throttled to a minimum interval, with exactly one mandatory
//! final present when the input stream completes.

use async_trait::async_trait;
use meas_types::{Axis, AxisPoints};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connector::InputConnector;
use crate::error::{FilterError, PipelineError, PipelineResult};
use crate::filter::{with_cancel, Filter};

/// The rendering backend a plot sink drives.
///
/// `trace`/`frame` fire once per completed window in stream order;
/// `present` is the rate-limited external update (e.g. pushing the drawn
/// state to a display or remote renderer).
pub trait TraceRenderer: Send {
    /// One completed 1-D trace: innermost-axis coordinates and values.
    fn trace(&mut self, xs: &[f64], ys: &[f64]);

    /// One completed 2-D frame in row-major order.
    fn frame(&mut self, rows: usize, cols: usize, values: &[f64]);

    /// Flush the latest drawn state to the outside world.
    fn present(&mut self);
}

/// A renderer that just logs, for headless runs.
#[derive(Default)]
pub struct LogRenderer;

impl TraceRenderer for LogRenderer {
    fn trace(&mut self, xs: &[f64], ys: &[f64]) {
        debug!(points = ys.len(), x0 = xs.first().copied().unwrap_or(0.0), "trace completed");
    }

    fn frame(&mut self, rows: usize, cols: usize, values: &[f64]) {
        debug!(rows, cols, points = values.len(), "frame completed");
    }

    fn present(&mut self) {
        info!("plot updated");
    }
}

/// Coalescing plot sink over one input stream.
pub struct TracePlotter {
    name: String,
    input: InputConnector,
    plot_dims: usize,
    interval: Duration,
    renderer: Box<dyn TraceRenderer>,
    // Resolved in final_init.
    window: usize,
    rows: usize,
    cols: usize,
    x_values: Vec<f64>,
    pending: Vec<f64>,
    last_present: Option<Instant>,
    dirty: bool,
}

impl TracePlotter {
    pub fn new(
        name: impl Into<String>,
        plot_dims: usize,
        interval: Duration,
        renderer: Box<dyn TraceRenderer>,
    ) -> Self {
        let name = name.into();
        Self {
            input: InputConnector::new(&name, "in"),
            name,
            plot_dims,
            interval,
            renderer,
            window: 0,
            rows: 0,
            cols: 0,
            x_values: Vec::new(),
            pending: Vec::new(),
            last_present: None,
            dirty: false,
        }
    }

    /// X coordinates for the innermost axis; joint axes plot against index.
    fn x_values(axis: &Axis) -> Vec<f64> {
        match axis.points() {
            AxisPoints::Scalar(points) => points.clone(),
            AxisPoints::Tuple(points) => (0..points.len()).map(|i| i as f64).collect(),
        }
    }

    /// Append a chunk and hand every newly completed window to the
    /// renderer, carrying the tail forward.
    fn ingest(&mut self, samples: &[f64]) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.window {
            {
                let window = &self.pending[..self.window];
                if self.plot_dims == 1 {
                    self.renderer.trace(&self.x_values, window);
                } else {
                    self.renderer.frame(self.rows, self.cols, window);
                }
            }
            self.pending.drain(..self.window);
            self.dirty = true;
        }
    }

    /// Rate-limited external update; `force` is the mandatory final one.
    fn maybe_present(&mut self, force: bool) {
        if !self.dirty && !force {
            return;
        }
        let now = Instant::now();
        let due = match self.last_present {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if force || due {
            self.renderer.present();
            self.last_present = Some(now);
            self.dirty = false;
        }
    }
}

#[async_trait]
impl Filter for TracePlotter {
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
        // Sink: nothing to propagate downstream.
        Ok(())
    }

    fn final_init(&mut self) -> PipelineResult<()> {
        if !(1..=2).contains(&self.plot_dims) {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("'{}' must plot 1 or 2 dimensions", self.name),
            });
        }
        let descriptor = self.input.descriptor()?;
        let dims = descriptor.dims();
        if self.plot_dims > dims.len() {
            return Err(PipelineError::InvalidConfiguration {
                message: format!(
                    "'{}' plots {} dimension(s) but the descriptor has {} axis/axes",
                    self.name,
                    self.plot_dims,
                    dims.len()
                ),
            });
        }

        self.cols = dims[dims.len() - 1];
        self.rows = if self.plot_dims == 2 {
            dims[dims.len() - 2]
        } else {
            1
        };
        self.window = self.rows * self.cols;
        // A zero-size window could never complete a trace.
        if self.window == 0 {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("'{}' resolved an empty plot window", self.name),
            });
        }
        self.x_values = Self::x_values(&descriptor.axes()[dims.len() - 1]);
        self.pending = Vec::with_capacity(self.window);
        info!(node = %self.name, window = self.window, "plot window resolved");
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        while let Some(chunk) = with_cancel(&cancel, self.input.next()).await? {
            self.ingest(&chunk.samples);
            self.maybe_present(false);
        }
        // Mandatory terminal update, whatever the interval says.
        self.maybe_present(true);
        Ok(())
    }
}
