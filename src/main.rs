use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use glam::DVec3;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphforce::coordinator::{LayoutCoordinator, PositionSink};
use graphforce::document::{load_document, load_settings};
use graphforce::model::NodePosition;
use graphforce::strategy::offloaded::EVENT_CAPACITY;
use graphforce::strategy::{
    EmbeddedStepper, LayoutEvent, LayoutStrategy, OffloadedStepper, StrategyKind, WorkerMessage,
    protocol, run_worker,
};

mod cli;

use cli::{Cli, Commands};

/// Counts forwarded updates and remembers when the layout settled
#[derive(Default)]
struct RunSink {
    updates: usize,
    settled: Option<f64>,
}

impl PositionSink for RunSink {
    fn set_node_position(&mut self, _id: &str, _position: DVec3) {
        self.updates += 1;
    }

    fn layout_stopped(&mut self, energy: f64) {
        self.settled = Some(energy);
    }
}

/// Result of `graphforce run`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    steps: usize,
    settled: bool,
    energy: f64,
    positions: Vec<NodePosition>,
}

async fn run(
    input: &Path,
    settings_path: Option<&Path>,
    offload: bool,
    max_steps: usize,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let document = load_document(input)
        .with_context(|| format!("failed to load graph from {}", input.display()))?;
    let (graph, mut settings) = document.into_parts();
    if let Some(path) = settings_path {
        settings = load_settings(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
    }
    let tick = settings.tick_interval();

    let strategy: Box<dyn LayoutStrategy> = if offload {
        Box::new(OffloadedStepper::spawn())
    } else {
        Box::new(EmbeddedStepper::new())
    };
    let mut coordinator = LayoutCoordinator::new(strategy, RunSink::default()).with_fallback(true);
    let skipped = coordinator.load(graph, settings)?;
    if !skipped.is_empty() {
        warn!(count = skipped.len(), "some graph entries were skipped");
    }

    let mut steps = 0;
    let mut energy = 0.0;
    if coordinator.snapshot().nodes.len() < 2 {
        info!("fewer than two nodes, nothing to lay out");
    } else {
        coordinator.start()?;
        for _ in 0..max_steps {
            if coordinator.strategy_kind() == StrategyKind::Offloaded {
                tokio::time::sleep(tick).await;
            }
            let events = match coordinator.pump() {
                Ok(events) => events,
                Err(err) if offload && coordinator.strategy_kind() == StrategyKind::Embedded => {
                    warn!(%err, "continuing on the embedded stepper");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            for event in events {
                if let LayoutEvent::Positions { energy: e, .. } = event {
                    steps += 1;
                    energy = e;
                }
            }
            if coordinator.sink().settled.is_some() {
                break;
            }
        }
    }
    coordinator.dispose();

    let settled = coordinator.sink().settled.is_some();
    info!(
        steps,
        settled,
        updates = coordinator.sink().updates,
        "layout finished"
    );
    let report = RunReport {
        steps,
        settled,
        energy,
        positions: coordinator
            .snapshot()
            .nodes
            .into_iter()
            .map(|n| NodePosition {
                id: n.id,
                x: n.x,
                y: n.y,
                z: n.z,
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} positions to {}", report.positions.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Bridge stdin/stdout JSON lines to a worker loop
async fn worker() -> anyhow::Result<()> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CAPACITY);
    let replies = event_tx.clone();
    let simulation = tokio::spawn(run_worker(command_rx, event_tx));

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match protocol::decode_host(&line) {
                Ok(message) => {
                    if command_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "malformed host message");
                    let reply = WorkerMessage::Error {
                        message: err.to_string(),
                    };
                    if replies.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
        anyhow::Ok(())
    });

    let mut stdout = tokio::io::stdout();
    while let Some(message) = event_rx.recv().await {
        let mut line = protocol::encode_worker(&message)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }

    reader.await??;
    simulation.await?;
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("graphforce=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            settings,
            offload,
            max_steps,
            output,
        } => {
            run(
                &input,
                settings.as_deref(),
                offload,
                max_steps,
                output.as_deref(),
            )
            .await?;
        }
        Commands::Worker => worker().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn cli_parses_run_with_defaults() {
        let cli = Cli::try_parse_from(["graphforce", "run", "--input", "graph.json"]).unwrap();
        match cli.command {
            Commands::Run {
                input,
                settings,
                offload,
                max_steps,
                output,
            } => {
                assert_eq!(input, PathBuf::from("graph.json"));
                assert!(settings.is_none());
                assert!(!offload);
                assert_eq!(max_steps, 20_000);
                assert!(output.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn cli_parses_run_with_options() {
        let cli = Cli::try_parse_from([
            "graphforce",
            "run",
            "-i",
            "graph.yaml",
            "--settings",
            "layout.json",
            "--offload",
            "--max-steps",
            "500",
            "-o",
            "out.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                settings,
                offload,
                max_steps,
                output,
                ..
            } => {
                assert_eq!(settings, Some(PathBuf::from("layout.json")));
                assert!(offload);
                assert_eq!(max_steps, 500);
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn cli_parses_worker_subcommand() {
        let cli = Cli::try_parse_from(["graphforce", "worker"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker));
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["graphforce"]).is_err());
    }
}
