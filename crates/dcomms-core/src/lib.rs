//! dcomms core library
//!
//! Session lifecycle and sync loop for two-party encrypted P2P chats.
//!
//! ## Overview
//!
//! Cryptography, discovery and message storage all live behind the
//! [`ConversationEngine`] trait. This crate decides everything around it:
//! which conversations exist and which are loaded, when to sync, which
//! peers are alive, when new messages arrived, and whether the local party
//! may send.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dcomms_core::{BroadcastSink, MemoryEngine, Orchestrator, OrchestratorConfig, SyncScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::load("/tmp/dcomms")?;
//!     let engine = Arc::new(MemoryEngine::new(config.peer_registry_path()));
//!     let sink = BroadcastSink::new();
//!     let mut events = sink.subscribe();
//!
//!     let orch = Arc::new(Orchestrator::start(config, engine, Arc::new(sink)).await?);
//!     let scheduler = SyncScheduler::spawn(Arc::clone(&orch));
//!
//!     let conv = orch.create("garden").await?;
//!     println!("invite: {}", orch.credentials("garden")?);
//!     orch.send(conv.handle, "hello").await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     scheduler.stop();
//!     orch.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod detector;
pub mod engine;
pub mod error;
pub mod invite;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod peers;
pub mod registry;
pub mod scheduler;
pub mod turn;
pub mod types;

// Re-exports
pub use config::OrchestratorConfig;
pub use detector::ChangeDetector;
pub use engine::{ConversationEngine, LoopbackHub, MemoryEngine};
pub use error::{ChatError, ChatResult, EngineError, EngineResult};
pub use invite::InviteCode;
pub use notify::{BroadcastSink, Notification, NotificationSink};
pub use orchestrator::{Orchestrator, ShutdownOutcome};
pub use peers::{parse_peer_registry, PeerCandidate, PeerLivenessTracker, PeerRecord, PeerSnapshot};
pub use registry::ConversationRegistry;
pub use scheduler::SyncScheduler;
pub use turn::TurnState;
pub use types::*;
