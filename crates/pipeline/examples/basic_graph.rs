//! A minimal end-to-end graph: an externally fed source averaged over its
//! repetition axis, rendered to the log, and persisted to a file.

use anyhow::Result;
use pipeline::config::GraphConfig;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let out = std::env::temp_dir().join("basic_graph.chgrp");

    // A 3-repetition sweep of a 5-point time axis: average the repetitions
    // away, plot the mean trace, and save it.
    let config_json = format!(
        r#"{{
            "nodes": [
                {{
                    "name": "adc",
                    "kind": "source",
                    "descriptor": {{
                        "axes": [
                            {{"names": ["rep"], "units": [""], "points": [0.0, 1.0, 2.0]}},
                            {{"names": ["t"], "units": ["s"],
                              "points": [0.0, 0.001, 0.002, 0.003, 0.004]}}
                        ]
                    }}
                }},
                {{"name": "avg", "kind": "average", "inputs": ["adc"]}},
                {{"name": "plot", "kind": "plot", "interval_ms": 100, "inputs": ["avg"]}},
                {{"name": "save", "kind": "write", "path": {out:?}, "group": "mean",
                  "inputs": ["avg"]}}
            ]
        }}"#
    );

    let (graph, mut handles) = GraphConfig::from_json(&config_json)?.build()?;
    let feed = handles.remove("adc").expect("source declared above");

    // Produce while the graph runs, with chunk boundaries that do not line
    // up with the 5-point traces.
    let producer = tokio::spawn(async move {
        for rep in 0..3 {
            let base = rep as f64;
            feed.push(vec![base, base + 1.0, base + 2.0]).await?;
            feed.push(vec![base + 3.0, base + 4.0]).await?;
        }
        feed.finish();
        Ok::<_, pipeline::error::FilterError>(())
    });

    graph.run().await?;
    producer.await??;

    println!("channel group written to {}", out.display());
    Ok(())
}
