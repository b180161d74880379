//! dcomms-node: headless host for the orchestrator
//!
//! Starts the engine, both sync cycles and writes every notification to
//! stdout as one JSON object per line, which is what a presentation layer
//! attaches to. Requests arrive on stdin, one JSON object per line (see
//! `dcomms_core::control`), and their responses share stdout with the
//! notifications. Ctrl-C stops the timers and tears the engine down within
//! the configured grace period.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dcomms_core::control;
use dcomms_core::logging::JsonlLayer;
use dcomms_core::{
    BroadcastSink, LoopbackHub, MemoryEngine, Orchestrator, OrchestratorConfig, ShutdownOutcome,
    SyncScheduler,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// dcomms node - two-party P2P chat sync
#[derive(Parser, Debug)]
#[command(name = "dcomms-node")]
#[command(about = "dcomms node - session and sync orchestrator")]
struct Args {
    /// Data directory (use different dirs for multiple instances)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Instance name (creates data dir: dcomms-<name>)
    #[arg(short, long)]
    name: Option<String>,

    /// Message exchange directory shared with the other party
    #[arg(long)]
    hub_dir: Option<PathBuf>,

    /// Shared peer registry file
    #[arg(long)]
    peer_registry: Option<PathBuf>,

    /// Also write JSON-lines logs under this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbosity: u8, log_dir: Option<&PathBuf>, node: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries notifications; logs go to stderr
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let jsonl = log_dir.map(|dir| JsonlLayer::new(dir, node)).transpose()?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(jsonl)
        .init();
    Ok(())
}

fn resolve_data_dir(args: &Args) -> (PathBuf, String) {
    if let Some(dir) = &args.data_dir {
        let node = args.name.clone().unwrap_or_else(|| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("node")
                .to_string()
        });
        return (dir.clone(), node);
    }

    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    match &args.name {
        Some(name) => (base.join(format!("dcomms-{}", name)), name.clone()),
        None => (base.join("dcomms"), "node".to_string()),
    }
}

fn print_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Failed to encode output line"),
    }
}

/// Answer stdin requests until the input closes. Each request runs on its
/// own task so a slow open does not hold up the rest.
fn spawn_control_reader(orch: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let orch = Arc::clone(&orch);
                    tokio::spawn(async move {
                        if let Some(response) = control::handle_line(&orch, &line).await {
                            print_line(&response);
                        }
                    });
                }
                Ok(None) => {
                    debug!("Control input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read control input");
                    break;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (data_dir, node) = resolve_data_dir(&args);
    setup_logging(args.verbose, args.log_dir.as_ref(), &node)?;

    let mut config = OrchestratorConfig::load(&data_dir)?;
    if let Some(registry) = &args.peer_registry {
        config = config.with_peer_registry(registry);
    }

    let sink = BroadcastSink::new();
    let mut events = sink.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_line(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification consumer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let hub_dir = args.hub_dir.clone().unwrap_or_else(|| data_dir.join("hub"));
    let orch = match LoopbackHub::new(&hub_dir) {
        Ok(hub) => {
            let engine = MemoryEngine::new(config.peer_registry_path()).with_hub(hub);
            Orchestrator::start(config, Arc::new(engine), Arc::new(sink)).await?
        }
        Err(e) => Orchestrator::unavailable(
            config,
            Arc::new(sink),
            format!("Cannot open hub directory {}: {}", hub_dir.display(), e),
        ),
    };
    let orch = Arc::new(orch);
    let scheduler = SyncScheduler::spawn(Arc::clone(&orch));
    let control = spawn_control_reader(Arc::clone(&orch));

    info!(%node, data_dir = %data_dir.display(), sync_port = ?orch.sync_port(), "Node running");
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    scheduler.stop();
    control.abort();
    if orch.shutdown().await == ShutdownOutcome::TimedOut {
        warn!("Engine did not stop in time, exiting anyway");
    }
    printer.abort();

    // The stdin reader can stay parked in a blocking read past runtime
    // shutdown, so leave without waiting for it
    std::process::exit(0)
}
