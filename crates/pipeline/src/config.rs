//! Declarative graph configuration
//!
//! A graph can be described as data and built in one call: a list of named
//! nodes, each with a `kind` tag and the upstream ports feeding it. Input
//! references take the form `"node"` (upstream port `out`) or
//! `"node.port"`. Building resolves every reference, wires the edges with
//! cycle rejection, and hands back a feed handle per external source.

use meas_types::Descriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::filters::{
    Averager, ExternalSource, GroupWriter, LogRenderer, Passthrough, SourceHandle, TracePlotter,
};
use crate::graph::Graph;

fn default_plot_dims() -> usize {
    1
}

fn default_interval_ms() -> u64 {
    250
}

fn default_column() -> String {
    "data".to_string()
}

/// The node kinds a configuration can instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Externally fed source with a declared shape.
    Source { descriptor: Descriptor },
    Passthrough,
    /// Mean over the outermost axis.
    Average,
    /// Coalescing plot sink rendering to the log.
    Plot {
        #[serde(default = "default_plot_dims")]
        dims: usize,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
    },
    /// Channel-group file sink.
    Write {
        path: PathBuf,
        group: String,
        #[serde(default = "default_column")]
        column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: FilterKind,
    /// Upstream references, `"node"` or `"node.port"`.
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub nodes: Vec<NodeConfig>,
}

impl GraphConfig {
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Instantiate the graph: one filter per node, one edge per input
    /// reference. Returns the feed handle of every `source` node, keyed by
    /// node name.
    pub fn build(self) -> PipelineResult<(Graph, BTreeMap<String, SourceHandle>)> {
        let mut graph = Graph::new();
        let mut handles = BTreeMap::new();

        for node in &self.nodes {
            match &node.kind {
                FilterKind::Source { descriptor } => {
                    let (source, handle) = ExternalSource::new(&node.name, descriptor.clone());
                    graph.add_node(Box::new(source))?;
                    handles.insert(node.name.clone(), handle);
                }
                FilterKind::Passthrough => {
                    graph.add_node(Box::new(Passthrough::new(&node.name)))?;
                }
                FilterKind::Average => {
                    graph.add_node(Box::new(Averager::new(&node.name)))?;
                }
                FilterKind::Plot { dims, interval_ms } => {
                    graph.add_node(Box::new(TracePlotter::new(
                        &node.name,
                        *dims,
                        Duration::from_millis(*interval_ms),
                        Box::new(LogRenderer),
                    )))?;
                }
                FilterKind::Write {
                    path,
                    group,
                    column,
                } => {
                    graph.add_node(Box::new(
                        GroupWriter::new(&node.name, path.clone(), group).with_column(column),
                    ))?;
                }
            }
        }

        for node in &self.nodes {
            let to = graph
                .node_id(&node.name)
                .expect("node added in the pass above");
            for reference in &node.inputs {
                let (upstream, port) = match reference.split_once('.') {
                    Some((name, port)) => (name, port),
                    None => (reference.as_str(), "out"),
                };
                let from = graph.node_id(upstream).ok_or_else(|| {
                    PipelineError::InvalidConfiguration {
                        message: format!(
                            "node '{}' references unknown upstream '{upstream}'",
                            node.name
                        ),
                    }
                })?;
                graph.connect(from, port, to, "in")?;
            }
        }

        info!(
            nodes = graph.num_nodes(),
            edges = graph.edges().len(),
            "graph built from configuration"
        );
        Ok((graph, handles))
    }
}
