//! Conversation engine contract
//!
//! The engine owns everything cryptographic: key derivation, secret
//! exchange, discovery, message storage and encryption. The orchestrator
//! only sees handles, message lists and a turn-state code, and treats every
//! call as a potentially slow async operation whose internal threading is
//! unknown.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                │
//! │  ├── ConversationRegistry ──┐                                │
//! │  ├── ChangeDetector ────────┼──► dyn ConversationEngine      │
//! │  └── SyncScheduler ─────────┘      ├── MemoryEngine (here)   │
//! │                                    └── native engine (FFI)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod hub;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{ConversationInfo, EngineHandle, EngineStatus, Message, OpenedConversation};

pub use hub::{HubEntry, LoopbackHub};
pub use memory::MemoryEngine;

/// Everything the orchestrator needs from a conversation engine.
///
/// Implementations must be safe to call from several tasks at once.
/// `sync_with_peers` in particular may be invoked by a manual trigger while
/// a scheduled sync is still running; serializing those is the engine's
/// job.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Start the inbound sync server, returning its port
    async fn start_server(&self) -> EngineResult<u16>;

    /// Publish our sync port to the shared peer registry
    async fn register_address(&self, port: u16) -> EngineResult<()>;

    /// Start background peer discovery
    async fn start_discovery(&self, port: u16, data_dir: &Path) -> EngineResult<()>;

    /// Announce a conversation secret to discovery so peers can find us.
    ///
    /// Engines without discovery can rely on the default no-op.
    async fn add_discovery_secret(&self, _secret_id: &str) -> EngineResult<()> {
        Ok(())
    }

    /// Open a persisted conversation. Dominated by key derivation (seconds).
    async fn load_conversation(&self, name: &str, data_dir: &Path)
        -> EngineResult<OpenedConversation>;

    /// Create a fresh conversation with new credentials (we are the initiator)
    async fn create_conversation(&self, name: &str) -> EngineResult<OpenedConversation>;

    /// Join a conversation from the initiator's credentials
    async fn join_conversation(
        &self,
        name: &str,
        user_key: &str,
        secret_id: &str,
    ) -> EngineResult<OpenedConversation>;

    /// Persist the conversation as `<data_dir>/chats/<name>.chat`
    async fn save_conversation(
        &self,
        handle: EngineHandle,
        name: &str,
        data_dir: &Path,
    ) -> EngineResult<()>;

    /// Full ordered message list
    async fn get_messages(&self, handle: EngineHandle) -> EngineResult<Vec<Message>>;

    /// Metadata and current turn-state code, `None` for an unknown handle
    async fn get_info(&self, handle: EngineHandle) -> EngineResult<Option<ConversationInfo>>;

    /// Send a message; fails with `EngineError::NotYourTurn` out of turn
    async fn send_message(&self, handle: EngineHandle, text: &str) -> EngineResult<()>;

    /// Tear down a loaded conversation
    async fn destroy_conversation(&self, handle: EngineHandle) -> EngineResult<()>;

    /// Exchange message lists with reachable peers; returns messages added
    async fn sync_with_peers(&self) -> EngineResult<usize>;

    /// Add a sync peer manually
    async fn add_peer(&self, host: &str, port: u16) -> EngineResult<()>;

    /// Implementation-defined health map
    async fn get_status(&self) -> EngineStatus;

    /// Stop servers and background work
    async fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}
