//! Integration tests for the pipeline.

use async_trait::async_trait;
use meas_types::{Axis, Descriptor};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::GraphConfig;
use crate::connector::InputConnector;
use crate::error::{FilterError, PipelineError, PipelineResult};
use crate::filter::{with_cancel, Filter};
use crate::filters::{ExternalSource, Passthrough};
use crate::graph::Graph;
use crate::store::read_groups;

/// Sink that collects every sample it receives.
struct CollectSink {
    name: String,
    input: InputConnector,
    seen: Arc<Mutex<Vec<f64>>>,
}

impl CollectSink {
    fn new(name: &str) -> (Self, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                input: InputConnector::new(name, "in"),
                seen: seen.clone(),
            },
            seen,
        )
    }
}

#[async_trait]
impl Filter for CollectSink {
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

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        while let Some(chunk) = with_cancel(&cancel, self.input.next()).await? {
            self.seen.lock().unwrap().extend_from_slice(&chunk.samples);
        }
        Ok(())
    }
}

/// Sink that fails on the first chunk it receives.
struct FailingSink {
    name: String,
    input: InputConnector,
}

impl FailingSink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input: InputConnector::new(name, "in"),
        }
    }
}

#[async_trait]
impl Filter for FailingSink {
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

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), FilterError> {
        with_cancel(&cancel, self.input.next()).await?;
        Err(FilterError::Fatal("simulated hardware fault".into()))
    }
}

fn two_by_three() -> Descriptor {
    let mut d = Descriptor::new();
    d.add_axis(Axis::scalar("rep", "", vec![0.0, 1.0]).unwrap());
    d.add_axis(Axis::scalar("t", "s", vec![0.0, 0.1, 0.2]).unwrap());
    d
}

#[tokio::test]
async fn full_graph_averages_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.chgrp");

    // 1. Describe the graph as data: source -> average -> file sink.
    let config_json = format!(
        r#"{{
            "nodes": [
                {{
                    "name": "adc",
                    "kind": "source",
                    "descriptor": {{
                        "axes": [
                            {{"names": ["rep"], "units": [""], "points": [0.0, 1.0]}},
                            {{"names": ["t"], "units": ["s"], "points": [0.0, 0.1, 0.2]}}
                        ]
                    }}
                }},
                {{"name": "avg", "kind": "average", "inputs": ["adc"]}},
                {{
                    "name": "save",
                    "kind": "write",
                    "path": {path:?},
                    "group": "demod",
                    "column": "amplitude",
                    "inputs": ["avg"]
                }}
            ]
        }}"#
    );

    // 2. Build it and take the source's feed handle.
    let (graph, mut handles) = GraphConfig::from_json(&config_json).unwrap().build().unwrap();
    let handle = handles.remove("adc").unwrap();

    // 3. Feed one complete pass split across uneven chunks, then finish.
    handle.push(vec![1.0, 2.0, 3.0, 3.0]).await.unwrap();
    handle.push(vec![4.0, 5.0]).await.unwrap();
    handle.finish();

    // 4. Run to completion and check the persisted group.
    graph.run().await.unwrap();
    let loaded = read_groups(&path).unwrap();
    let (columns, descriptor) = &loaded["demod"];
    assert_eq!(columns["amplitude"], vec![2.0, 3.0, 4.0]);
    assert_eq!(descriptor.dims(), vec![3]);
    assert_eq!(descriptor.axis_names(), vec!["t"]);
}

#[tokio::test]
async fn fan_out_feeds_every_branch_the_same_data() {
    let (source, handle) = ExternalSource::new("adc", two_by_three());
    let (sink_a, seen_a) = CollectSink::new("a");
    let (sink_b, seen_b) = CollectSink::new("b");

    let mut graph = Graph::new();
    let src = graph.add_node(Box::new(source)).unwrap();
    let a = graph.add_node(Box::new(sink_a)).unwrap();
    let b = graph.add_node(Box::new(sink_b)).unwrap();
    graph.connect(src, "out", a, "in").unwrap();
    graph.connect(src, "out", b, "in").unwrap();

    handle.push(vec![1.0, 2.0, 3.0]).await.unwrap();
    handle.push(vec![4.0, 5.0, 6.0]).await.unwrap();
    handle.finish();

    graph.run().await.unwrap();
    let expected = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    assert_eq!(*seen_a.lock().unwrap(), expected);
    assert_eq!(*seen_b.lock().unwrap(), expected);
}

#[tokio::test]
async fn done_propagates_through_a_chain() {
    let (source, handle) = ExternalSource::new("adc", two_by_three());
    let (sink, seen) = CollectSink::new("sink");

    let mut graph = Graph::new();
    let src = graph.add_node(Box::new(source)).unwrap();
    let p1 = graph.add_node(Box::new(Passthrough::new("p1"))).unwrap();
    let p2 = graph.add_node(Box::new(Passthrough::new("p2"))).unwrap();
    let end = graph.add_node(Box::new(sink)).unwrap();
    graph.connect(src, "out", p1, "in").unwrap();
    graph.connect(p1, "out", p2, "in").unwrap();
    graph.connect(p2, "out", end, "in").unwrap();

    handle.push(vec![1.0, 2.0]).await.unwrap();
    handle.finish();

    // The graph only returns once done has flowed through every stage.
    graph.run().await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.0]);
}

#[tokio::test]
async fn first_failure_cancels_the_whole_graph() {
    let (source, handle) = ExternalSource::new("adc", two_by_three());

    let mut graph = Graph::new();
    let src = graph.add_node(Box::new(source)).unwrap();
    let bad = graph.add_node(Box::new(FailingSink::new("bad"))).unwrap();
    graph.connect(src, "out", bad, "in").unwrap();

    // The handle stays open, so the source alone would run forever; only
    // graph-wide cancellation lets this return.
    handle.push(vec![1.0]).await.unwrap();
    let err = graph.run().await.unwrap_err();
    match err {
        PipelineError::Runtime { node, source } => {
            assert_eq!(node, "bad");
            assert!(matches!(source, FilterError::Fatal(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    drop(handle);
}

#[tokio::test]
async fn conflicting_upstream_shapes_abort_before_running() {
    let (wide, _keep_wide) = ExternalSource::new("wide", two_by_three());
    let mut narrow_descriptor = Descriptor::new();
    narrow_descriptor.add_axis(Axis::scalar("t", "s", vec![0.0, 0.1]).unwrap());
    let (narrow, _keep_narrow) = ExternalSource::new("narrow", narrow_descriptor);
    let (sink, _) = CollectSink::new("sink");

    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(wide)).unwrap();
    let b = graph.add_node(Box::new(narrow)).unwrap();
    let end = graph.add_node(Box::new(sink)).unwrap();
    graph.connect(a, "out", end, "in").unwrap();
    graph.connect(b, "out", end, "in").unwrap();

    assert!(matches!(
        graph.run().await,
        Err(PipelineError::DescriptorMismatch { .. })
    ));
}

#[test]
fn connecting_an_unknown_port_names_the_offending_node() {
    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Passthrough::new("a"))).unwrap();
    let b = graph.add_node(Box::new(Passthrough::new("b"))).unwrap();

    match graph.connect(a, "sideband", b, "in") {
        Err(PipelineError::PortNotFound { node, port }) => {
            assert_eq!(node, "a");
            assert_eq!(port, "sideband");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    match graph.connect(a, "out", b, "sideband") {
        Err(PipelineError::PortNotFound { node, port }) => {
            assert_eq!(node, "b");
            assert_eq!(port, "sideband");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(graph.edges().is_empty());
}

#[test]
fn connecting_a_cycle_is_rejected_and_leaves_the_graph_intact() {
    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Passthrough::new("a"))).unwrap();
    let b = graph.add_node(Box::new(Passthrough::new("b"))).unwrap();
    graph.connect(a, "out", b, "in").unwrap();
    assert!(matches!(
        graph.connect(b, "out", a, "in"),
        Err(PipelineError::CircularDependency)
    ));
    assert_eq!(graph.edges().len(), 1);
}
