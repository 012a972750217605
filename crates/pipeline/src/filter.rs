//! Core filter (node) trait and lifecycle
//!
//! Every node in the graph implements [`Filter`]. The lifecycle is strictly
//! ordered with no backward transitions:
//!
//! `Created -> DescriptorsResolved -> Ready -> Running -> Completed | Failed`
//!
//! `update_descriptors` runs once per node in a topological pre-pass before
//! any payload flows; `final_init` validates configuration against the
//! resolved descriptors and allocates buffers; `run` is the steady-state
//! loop driven entirely by stream suspension points.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connector::{InputConnector, OutputConnector};
use crate::error::{FilterError, PipelineResult};

/// Runtime state of a node, advanced only by the scheduler.
///
/// The graph tracks states through `Running`, at which point each filter is
/// detached into its own task and the graph itself is consumed. The terminal
/// outcome of a node is therefore reported through the run result (`Ok`, or
/// `Runtime { node, source }` naming the failed node), not read back from a
/// stored `Completed`/`Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Created,
    DescriptorsResolved,
    Ready,
    Running,
    Completed,
    Failed,
}

impl FilterState {
    fn rank(self) -> u8 {
        match self {
            FilterState::Created => 0,
            FilterState::DescriptorsResolved => 1,
            FilterState::Ready => 2,
            FilterState::Running => 3,
            FilterState::Completed | FilterState::Failed => 4,
        }
    }

    /// A transition is legal only one step forward; the terminal states are
    /// reachable solely from `Running`.
    pub fn can_advance(self, to: FilterState) -> bool {
        to.rank() == self.rank() + 1
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FilterState::Completed | FilterState::Failed)
    }
}

/// A unit of computation with named input/output connectors.
///
/// Implementations own their connectors and private buffers; the connectors
/// are wired and their descriptors resolved by the graph before `run` is
/// scheduled. A filter is mutated only by its own task during execution.
#[async_trait]
pub trait Filter: Send {
    /// Node name, unique within the graph.
    fn name(&self) -> &str;

    /// Names of this node's input ports.
    fn input_ports(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of this node's output ports.
    fn output_ports(&self) -> Vec<String> {
        Vec::new()
    }

    fn input_mut(&mut self, port: &str) -> Option<&mut InputConnector> {
        let _ = port;
        None
    }

    fn output_mut(&mut self, port: &str) -> Option<&mut OutputConnector> {
        let _ = port;
        None
    }

    /// Compute this node's output descriptor(s) as a pure function of its
    /// resolved input descriptors and configuration, and set them on every
    /// output connector. Runs exactly once, sources first.
    fn update_descriptors(&mut self) -> PipelineResult<()>;

    /// Validate resolved descriptors against the node's configuration and
    /// allocate run buffers. Violations fail fast before any task is
    /// scheduled.
    fn final_init(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// The steady-state loop: suspend on input streams, transform, push
    /// downstream, and return once every input is done and drained. Must
    /// observe `cancel` at its suspension points and unwind without
    /// processing further data.
    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError>;
}

/// Run one stream suspension point under graph-wide cancellation.
///
/// Filters wrap every `next`/`push` await in this so cancellation is
/// observed at the next suspension point, as the concurrency model requires.
pub async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T> + Send,
) -> Result<T, FilterError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(FilterError::Cancelled),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_strictly_forward() {
        use FilterState::*;
        assert!(Created.can_advance(DescriptorsResolved));
        assert!(DescriptorsResolved.can_advance(Ready));
        assert!(Ready.can_advance(Running));
        assert!(Running.can_advance(Completed));
        assert!(Running.can_advance(Failed));

        assert!(!Created.can_advance(Ready));
        assert!(!Running.can_advance(Ready));
        assert!(!Completed.can_advance(Running));
        assert!(!Completed.can_advance(Failed));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }
}
