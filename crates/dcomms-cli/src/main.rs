//! dcomms CLI
//!
//! One-shot commands against a node's data directory, backed by the
//! loopback engine. Two data directories that share a `--hub-dir` and
//! `--peer-registry` behave like two parties of the same network.
//!
//! ## Usage
//!
//! ```bash
//! # Alice starts a conversation and prints the invite
//! dcomms -d /tmp/alice --hub-dir /tmp/hub create lunch
//!
//! # Bob joins with it
//! dcomms -d /tmp/bob --hub-dir /tmp/hub join lunch <invite>
//!
//! # Take turns
//! dcomms -d /tmp/alice --hub-dir /tmp/hub send lunch "noon?"
//! dcomms -d /tmp/alice --hub-dir /tmp/hub sync
//! dcomms -d /tmp/bob --hub-dir /tmp/hub sync
//! dcomms -d /tmp/bob --hub-dir /tmp/hub messages lunch
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dcomms_core::{
    BroadcastSink, ChatError, Conversation, LoopbackHub, MemoryEngine, Orchestrator,
    OrchestratorConfig, TurnState,
};
use tracing::{debug, info};

/// dcomms - two-party P2P chats
#[derive(Parser)]
#[command(name = "dcomms")]
#[command(version = "0.1.0")]
#[command(about = "dcomms - two-party turn-based P2P chats")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.dcomms/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Message exchange directory shared with the other party
    /// (default: <data-dir>/hub)
    #[arg(long, global = true)]
    hub_dir: Option<PathBuf>,

    /// Shared peer registry file (default: <data-dir>/registry.db)
    #[arg(long, global = true)]
    peer_registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known conversations
    List,

    /// Create a conversation and print its invite code
    Create {
        /// Conversation name
        name: String,
    },

    /// Join a conversation from a 64-character invite code
    Join {
        /// Local name for the conversation
        name: String,
        /// Invite code from the initiator
        invite: String,
    },

    /// Load a conversation and show its state
    Open {
        name: String,
    },

    /// Delete a conversation and its file
    Delete {
        name: String,
    },

    /// Send a message (fails when it is the peer's turn)
    Send {
        name: String,
        text: String,
    },

    /// Print a conversation's messages
    Messages {
        name: String,
    },

    /// Print a conversation's invite code
    Credentials {
        name: String,
    },

    /// Load every conversation and sync once
    Sync,

    /// Probe registered peers
    Peers,

    /// Add a peer to the shared registry
    AddPeer {
        host: String,
        port: u16,
    },

    /// Show engine status as JSON
    Status,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (~/.dcomms/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dcomms")
        .join("data")
}

async fn start_orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    // One-shot runs stay out of the peer registry
    let mut config = OrchestratorConfig::load(&data_dir)
        .with_context(|| format!("Failed to load config from {}", data_dir.display()))?
        .with_advertise(false);
    if let Some(registry) = &cli.peer_registry {
        config = config.with_peer_registry(registry);
    }

    let hub_dir = cli.hub_dir.clone().unwrap_or_else(|| data_dir.join("hub"));
    let hub = LoopbackHub::new(&hub_dir)
        .with_context(|| format!("Failed to open hub at {}", hub_dir.display()))?;
    let engine = MemoryEngine::new(config.peer_registry_path()).with_hub(hub);
    debug!(data_dir = %data_dir.display(), hub_dir = %hub_dir.display(), "Starting orchestrator");

    let orch = Orchestrator::start(config, Arc::new(engine), Arc::new(BroadcastSink::new())).await?;
    Ok(orch)
}

fn describe_turn(state: TurnState) -> &'static str {
    if state.may_send() {
        "your turn"
    } else {
        "waiting for peer"
    }
}

async fn print_conversation(orch: &Orchestrator, conv: &Conversation) {
    let messages = orch.messages(conv.handle).await;
    println!("Conversation: {}", conv.name);
    println!("  Handle: {}", conv.handle);
    println!(
        "  Role: {}",
        if conv.is_initiator { "initiator" } else { "joiner" }
    );
    if let Some(info) = orch.info(conv.handle).await {
        println!("  Turn: {}", describe_turn(info.turn_state()));
    }
    println!("  Messages: {}", messages.len());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let orch = start_orchestrator(&cli).await?;
    let result = run(&orch, cli.command).await;
    orch.shutdown().await;
    result
}

async fn run(orch: &Orchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            let rows = orch.list_known();
            if rows.is_empty() {
                println!("No conversations found.");
            } else {
                println!("Conversations ({}):", rows.len());
                for row in rows {
                    let loaded = if row.loaded { " [loaded]" } else { "" };
                    println!("  {}{}", row.name, loaded);
                }
            }
        }

        Commands::Create { name } => {
            let conv = orch.create(&name).await?;
            info!(%name, handle = %conv.handle, "Conversation created");
            let invite = orch.credentials(&name)?;
            println!("Created conversation: {}", name);
            println!("  Invite: {}", invite);
        }

        Commands::Join { name, invite } => {
            let conv = orch.join_with_invite(&name, &invite).await?;
            info!(%name, handle = %conv.handle, "Conversation joined");
            println!("Joined conversation: {}", name);
            print_conversation(orch, &conv).await;
        }

        Commands::Open { name } => {
            let conv = orch.open(&name).await?;
            print_conversation(orch, &conv).await;
        }

        Commands::Delete { name } => {
            orch.delete(&name).await?;
            info!(%name, "Conversation deleted");
            println!("Deleted conversation: {}", name);
        }

        Commands::Send { name, text } => {
            let conv = orch.open(&name).await?;
            match orch.send(conv.handle, &text).await {
                Ok(state) => {
                    println!("Sent to {}.", name);
                    println!("  Turn: {}", describe_turn(state));
                }
                Err(ChatError::NotYourTurn) => {
                    anyhow::bail!("Not your turn: wait for the peer's reply and sync");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Messages { name } => {
            let conv = orch.open(&name).await?;
            let messages = orch.messages(conv.handle).await;
            if messages.is_empty() {
                println!("No messages in {}.", name);
            } else {
                println!("Messages in {} ({}):", name, messages.len());
                for msg in messages {
                    let who = if msg.is_me { "me" } else { "peer" };
                    println!("  [{}] {}", who, msg.text);
                }
            }
        }

        Commands::Credentials { name } => {
            orch.open(&name).await?;
            println!("{}", orch.credentials(&name)?);
        }

        Commands::Sync => {
            for row in orch.list_known() {
                debug!(name = %row.name, "Loading before sync");
                if let Err(e) = orch.open(&row.name).await {
                    eprintln!("Skipping {}: {}", row.name, e);
                }
            }
            let added = orch.sync_now().await?;
            println!("Synced: {} new message(s)", added);
        }

        Commands::Peers => {
            let snapshot = orch.refresh_peers().await;
            if snapshot.peers.is_empty() {
                println!("No peers registered.");
            } else {
                println!("Peers ({} live of {}):", snapshot.count, snapshot.peers.len());
                for peer in snapshot.peers {
                    let state = if peer.live { "live" } else { "unreachable" };
                    let seen = peer
                        .last_seen
                        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".into());
                    println!("  {}:{} {} (last seen: {})", peer.host, peer.port, state, seen);
                }
            }
        }

        Commands::AddPeer { host, port } => {
            orch.add_peer(&host, port).await?;
            println!("Added peer: {}:{}", host, port);
        }

        Commands::Status => {
            let status = orch.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
