//! Push notifications to the presentation layer
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Notification: what the UI hears about                          │
//! │  ├── Ready: startup finished (sync port, stub names)            │
//! │  ├── Error: startup failure worth showing                       │
//! │  ├── MessagesUpdate: a conversation's message count changed     │
//! │  ├── SyncStart / SyncDone: network sync tick boundaries         │
//! │  └── PeersUpdate: liveness refresh result                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use tokio::sync::broadcast;

use crate::peers::PeerRecord;
use crate::turn::TurnState;
use crate::types::{EngineHandle, Message};

/// Default capacity for the notification broadcast channel
const NOTIFY_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Ready {
        sync_port: Option<u16>,
        stub_names: Vec<String>,
    },
    Error {
        message: String,
    },
    MessagesUpdate {
        handle: EngineHandle,
        name: String,
        messages: Vec<Message>,
        turn_state: TurnState,
    },
    SyncStart,
    SyncDone {
        added: usize,
    },
    PeersUpdate {
        count: usize,
        peers: Vec<PeerRecord>,
    },
}

impl Notification {
    /// Event name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Ready { .. } => "ready",
            Notification::Error { .. } => "error",
            Notification::MessagesUpdate { .. } => "messages_update",
            Notification::SyncStart => "sync_start",
            Notification::SyncDone { .. } => "sync_done",
            Notification::PeersUpdate { .. } => "peers_update",
        }
    }
}

/// Where notifications go. Must not block; the orchestrator calls this
/// from its timer tasks.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Fan-out sink backed by a tokio broadcast channel.
///
/// Notifications sent with no subscriber attached are dropped, matching a
/// presentation layer that has not opened a window yet.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}
