//! Graph construction and concurrent execution
//!
//! Nodes live in a slab arena and are addressed by integer handles; edges
//! are (output port, input port) pairs wired with one bounded stream each.
//! Cycles are rejected when the edge is added, never discovered at run time.
//!
//! Execution is a topological descriptor-propagation pre-pass followed by
//! one independent task per node. The scheduler imposes no barrier beyond
//! what stream dependencies enforce: tasks run to completion purely through
//! their push/next suspension points. The first node to fail cancels every
//! other task through a shared token, and the graph reports the originating
//! node and cause.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use meas_types::Descriptor;

use crate::error::{FilterError, PipelineError, PipelineResult};
use crate::filter::{Filter, FilterState};
use crate::stream::DEFAULT_CAPACITY;

/// Handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One directed edge between two ports.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub from_port: String,
    pub to: NodeId,
    pub to_port: String,
}

struct GraphNode {
    filter: Box<dyn Filter>,
    state: FilterState,
}

/// A DAG of filter nodes, built once per experiment run.
pub struct Graph {
    nodes: Slab<GraphNode>,
    names: HashMap<String, NodeId>,
    edges: Vec<Edge>,
    capacity: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A graph whose edges carry queues of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::new(),
            names: HashMap::new(),
            edges: Vec::new(),
            capacity,
        }
    }

    /// Add a node. Node names must be unique within the graph.
    pub fn add_node(&mut self, filter: Box<dyn Filter>) -> PipelineResult<NodeId> {
        let name = filter.name().to_string();
        if self.names.contains_key(&name) {
            return Err(PipelineError::DuplicateNode { name });
        }
        let id = NodeId(self.nodes.insert(GraphNode {
            filter,
            state: FilterState::Created,
        }));
        self.names.insert(name, id);
        Ok(id)
    }

    /// Look a node up by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn node_name(&self, id: NodeId) -> String {
        self.nodes
            .get(id.0)
            .map(|n| n.filter.name().to_string())
            .unwrap_or_else(|| format!("#{}", id.0))
    }

    /// Wire `from.from_port` to `to.to_port` with a fresh bounded stream.
    ///
    /// The edge set is checked for cycles before anything is wired, so a
    /// rejected connect leaves the graph untouched.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: &str,
        to: NodeId,
        to_port: &str,
    ) -> PipelineResult<()> {
        for id in [from, to] {
            if !self.nodes.contains(id.0) {
                return Err(PipelineError::NodeNotFound {
                    name: self.node_name(id),
                });
            }
        }

        let edge = Edge {
            from,
            from_port: from_port.to_string(),
            to,
            to_port: to_port.to_string(),
        };
        self.check_acyclic(Some(&edge))?;

        let (from_node, to_node) = self
            .nodes
            .get2_mut(from.0, to.0)
            .expect("both nodes checked above");

        let from_name = from_node.filter.name().to_string();
        let to_name = to_node.filter.name().to_string();
        let output = from_node
            .filter
            .output_mut(from_port)
            .ok_or_else(|| PipelineError::PortNotFound {
                node: from_name,
                port: from_port.to_string(),
            })?;
        let input = to_node
            .filter
            .input_mut(to_port)
            .ok_or_else(|| PipelineError::PortNotFound {
                node: to_name,
                port: to_port.to_string(),
            })?;

        let reader = output.subscribe(self.capacity);
        input.bind(reader);
        debug!(
            from = %self.node_name(from), from_port,
            to = %self.node_name(to), to_port,
            "edge wired"
        );
        self.edges.push(edge);
        Ok(())
    }

    /// Reject any edge set containing a cycle, optionally with one
    /// tentative extra edge.
    fn check_acyclic(&self, extra: Option<&Edge>) -> PipelineResult<()> {
        let mut dag = DiGraph::<NodeId, ()>::new();
        let mut indices = HashMap::new();
        for (key, _) in self.nodes.iter() {
            indices.insert(NodeId(key), dag.add_node(NodeId(key)));
        }
        for edge in self.edges.iter().chain(extra) {
            dag.add_edge(indices[&edge.from], indices[&edge.to], ());
        }
        toposort(&dag, None)
            .map(|_| ())
            .map_err(|_| PipelineError::CircularDependency)
    }

    /// Topological order of the node handles, sources first.
    fn topo_order(&self) -> PipelineResult<Vec<NodeId>> {
        let mut dag = DiGraph::<NodeId, ()>::new();
        let mut indices = HashMap::new();
        for (key, _) in self.nodes.iter() {
            indices.insert(NodeId(key), dag.add_node(NodeId(key)));
        }
        for edge in &self.edges {
            dag.add_edge(indices[&edge.from], indices[&edge.to], ());
        }
        let sorted = toposort(&dag, None).map_err(|_| PipelineError::CircularDependency)?;
        Ok(sorted.into_iter().map(|ix| dag[ix]).collect())
    }

    fn advance(&mut self, id: NodeId, to: FilterState) -> PipelineResult<()> {
        let node = &mut self.nodes[id.0];
        if !node.state.can_advance(to) {
            return Err(PipelineError::InvalidState {
                node: node.filter.name().to_string(),
                from: node.state,
                to,
            });
        }
        node.state = to;
        Ok(())
    }

    /// Run the descriptor-propagation pre-pass: `update_descriptors` per
    /// node in topological order, copying each resolved output descriptor
    /// across its edges into the downstream input connectors.
    fn propagate_descriptors(&mut self, order: &[NodeId]) -> PipelineResult<()> {
        for &id in order {
            self.nodes[id.0].filter.update_descriptors()?;
            self.advance(id, FilterState::DescriptorsResolved)?;

            let outgoing: Vec<Edge> = self
                .edges
                .iter()
                .filter(|e| e.from == id)
                .cloned()
                .collect();
            for edge in outgoing {
                let descriptor: Arc<Descriptor> = {
                    let node = &mut self.nodes[edge.from.0];
                    let name = node.filter.name().to_string();
                    node.filter
                        .output_mut(&edge.from_port)
                        .ok_or_else(|| PipelineError::PortNotFound {
                            node: name,
                            port: edge.from_port.clone(),
                        })?
                        .descriptor()?
                };
                let downstream = &mut self.nodes[edge.to.0];
                let name = downstream.filter.name().to_string();
                downstream
                    .filter
                    .input_mut(&edge.to_port)
                    .ok_or_else(|| PipelineError::PortNotFound {
                        node: name,
                        port: edge.to_port.clone(),
                    })?
                    .merge_descriptor(descriptor)?;
            }
        }
        Ok(())
    }

    /// Execute the graph to completion.
    ///
    /// Aborts before any task is scheduled on configuration errors. At run
    /// time the first node to fail cancels all others; the error names the
    /// originating node and its cause.
    pub async fn run(mut self) -> PipelineResult<()> {
        let order = self.topo_order()?;
        info!(nodes = order.len(), edges = self.edges.len(), "starting graph");

        self.propagate_descriptors(&order)?;
        for &id in &order {
            self.nodes[id.0].filter.final_init()?;
            self.advance(id, FilterState::Ready)?;
        }

        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<(String, Result<(), FilterError>)> = JoinSet::new();
        for &id in &order {
            self.advance(id, FilterState::Running)?;
        }
        for node in self.nodes.drain() {
            let mut filter = node.filter;
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let name = filter.name().to_string();
                let result = filter.run(cancel).await;
                // Downstream done propagation must not depend on the filter
                // author remembering to close.
                for port in filter.output_ports() {
                    if let Some(out) = filter.output_mut(&port) {
                        out.close();
                    }
                }
                (name, result)
            });
        }

        let mut failure: Option<(String, FilterError)> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(node = %name, "node completed");
                }
                Ok((name, Err(FilterError::Cancelled))) => {
                    debug!(node = %name, "node unwound after cancellation");
                }
                Ok((name, Err(cause))) => {
                    error!(node = %name, %cause, "node failed, cancelling graph");
                    if failure.is_none() {
                        failure = Some((name, cause));
                    }
                    cancel.cancel();
                }
                Err(join_err) => {
                    error!(%join_err, "node task panicked, cancelling graph");
                    if failure.is_none() {
                        failure = Some((
                            "unknown".to_string(),
                            FilterError::Fatal(join_err.to_string()),
                        ));
                    }
                    cancel.cancel();
                }
            }
        }

        match failure {
            Some((node, source)) => Err(PipelineError::Runtime { node, source }),
            None => {
                info!("graph completed");
                Ok(())
            }
        }
    }
}
