//! The orchestrator context
//!
//! One `Orchestrator` is built at startup and shared by `Arc` with the
//! scheduler and whatever presentation layer drives it. It owns the
//! registry, snapshot counts and liveness map, and is the only thing that
//! talks to the conversation engine.
//!
//! ```text
//! start():  start_server ─► register_address ─► start_discovery
//!                └────────────► scan stubs ─► Ready
//!
//! network tick (in-flight guarded):
//!   SyncStart ─► engine.sync_with_peers ─► SyncDone{added}
//!     └─► (added > 0) detection pass ─► MessagesUpdate*
//!     └─► liveness refresh ─► PeersUpdate
//!
//! poll tick:  detection pass ─► MessagesUpdate*
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::detector::ChangeDetector;
use crate::engine::ConversationEngine;
use crate::error::{ChatError, ChatResult};
use crate::invite::InviteCode;
use crate::notify::{Notification, NotificationSink};
use crate::peers::{PeerLivenessTracker, PeerSnapshot};
use crate::registry::ConversationRegistry;
use crate::turn::TurnState;
use crate::types::{Conversation, ConversationInfo, ConversationSummary, EngineHandle, EngineStatus, Message};

/// How engine teardown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Teardown finished (or there was nothing to tear down)
    Clean,
    /// The grace period elapsed first; the host should exit anyway
    TimedOut,
}

/// Clears the in-flight flag however the sync cycle ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Orchestrator {
    engine: Option<Arc<dyn ConversationEngine>>,
    unavailable_reason: Option<String>,
    registry: ConversationRegistry,
    detector: ChangeDetector,
    peers: PeerLivenessTracker,
    sink: Arc<dyn NotificationSink>,
    config: OrchestratorConfig,
    sync_port: Option<u16>,
    sync_in_flight: AtomicBool,
    shut_down: AtomicBool,
}

impl Orchestrator {
    /// Bring up the engine's network side, discover stubs and emit `Ready`.
    ///
    /// A failing sync server or discovery start is logged and the node runs
    /// without it. Only a data directory that cannot be created or scanned
    /// is fatal.
    pub async fn start(
        config: OrchestratorConfig,
        engine: Arc<dyn ConversationEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> ChatResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let sync_port = match engine.start_server().await {
            Ok(port) => {
                info!(port, "Sync server started");
                Some(port)
            }
            Err(e) => {
                warn!(error = %e, "Sync server failed to start");
                None
            }
        };

        if let Some(port) = sync_port {
            if !config.advertise {
                debug!(port, "Not advertising sync address");
            } else if let Err(e) = engine.register_address(port).await {
                warn!(port, error = %e, "Failed to register sync address");
            }
            if let Err(e) = engine.start_discovery(port, &config.data_dir).await {
                warn!(port, error = %e, "Failed to start discovery");
            }
        }

        let registry = ConversationRegistry::new();
        let stub_names = registry.scan_stubs(&config.chats_dir()).await?;

        let orchestrator = Self {
            peers: PeerLivenessTracker::new(config.peer_registry_path(), config.probe_timeout()),
            engine: Some(engine),
            unavailable_reason: None,
            registry,
            detector: ChangeDetector::new(),
            sink,
            config,
            sync_port,
            sync_in_flight: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        };

        info!(?sync_port, stubs = stub_names.len(), "Orchestrator ready");
        orchestrator.sink.notify(Notification::Ready {
            sync_port,
            stub_names,
        });
        Ok(orchestrator)
    }

    /// Orchestrator for a node whose engine failed to initialize.
    ///
    /// Emits one `Error` notification. Every conversation operation then
    /// fails with `EngineUnavailable` and both cycles do nothing.
    pub fn unavailable(
        config: OrchestratorConfig,
        sink: Arc<dyn NotificationSink>,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        warn!(%reason, "Conversation engine unavailable");
        sink.notify(Notification::Error {
            message: reason.clone(),
        });

        Self {
            peers: PeerLivenessTracker::new(config.peer_registry_path(), config.probe_timeout()),
            engine: None,
            unavailable_reason: Some(reason),
            registry: ConversationRegistry::new(),
            detector: ChangeDetector::new(),
            sink,
            config,
            sync_port: None,
            sync_in_flight: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    fn engine(&self) -> ChatResult<&Arc<dyn ConversationEngine>> {
        self.engine.as_ref().ok_or_else(|| {
            ChatError::EngineUnavailable(
                self.unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "not initialized".into()),
            )
        })
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn sync_port(&self) -> Option<u16> {
        self.sync_port
    }

    /// True while a scheduled network sync is running
    pub fn sync_in_flight(&self) -> bool {
        self.sync_in_flight.load(Ordering::Acquire)
    }

    /// Last message count seen by the change detector
    pub fn snapshot_count(&self, handle: EngineHandle) -> Option<usize> {
        self.detector.count(handle)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Conversations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn list_known(&self) -> Vec<ConversationSummary> {
        self.registry.list_known()
    }

    /// Open a conversation by name; cheap when it is already loaded.
    pub async fn open(&self, name: &str) -> ChatResult<Conversation> {
        let engine = self.engine()?;
        let (conv, fresh) = self.registry.open(engine.as_ref(), self.data_dir(), name).await?;
        self.detector.track(conv.handle);
        if fresh {
            self.announce_secret(engine.as_ref(), &conv).await;
        }
        Ok(conv)
    }

    /// Create a conversation with fresh credentials; we are the initiator.
    pub async fn create(&self, name: &str) -> ChatResult<Conversation> {
        let engine = self.engine()?;
        let conv = self.registry.create(engine.as_ref(), self.data_dir(), name).await?;
        self.detector.track(conv.handle);
        self.announce_secret(engine.as_ref(), &conv).await;
        Ok(conv)
    }

    /// Join a conversation from the initiator's two 32-character halves.
    pub async fn join(&self, name: &str, user_key: &str, secret_id: &str) -> ChatResult<Conversation> {
        let engine = self.engine()?;
        let invite = InviteCode::from_parts(user_key, secret_id)?;
        let conv = self
            .registry
            .join(
                engine.as_ref(),
                self.data_dir(),
                name,
                invite.user_key(),
                invite.secret_id(),
            )
            .await?;
        self.detector.track(conv.handle);
        self.announce_secret(engine.as_ref(), &conv).await;
        Ok(conv)
    }

    /// Join from a pasted 64-character invite code.
    pub async fn join_with_invite(&self, name: &str, code: &str) -> ChatResult<Conversation> {
        let invite = InviteCode::parse(code)?;
        self.join(name, invite.user_key(), invite.secret_id()).await
    }

    /// Delete a conversation, its snapshot count and its file.
    pub async fn delete(&self, name: &str) -> ChatResult<()> {
        let engine = self.engine()?;
        if let Some(handle) = self.registry.delete(engine.as_ref(), self.data_dir(), name).await? {
            self.detector.forget(handle);
        }
        Ok(())
    }

    /// Invite code of a loaded conversation
    pub fn credentials(&self, name: &str) -> ChatResult<InviteCode> {
        let conv = self
            .registry
            .get(name)
            .ok_or_else(|| ChatError::NotFound(name.to_string()))?;
        InviteCode::from_parts(conv.user_key, conv.secret_id)
    }

    async fn announce_secret(&self, engine: &dyn ConversationEngine, conv: &Conversation) {
        if let Err(e) = engine.add_discovery_secret(&conv.secret_id).await {
            warn!(name = %conv.name, error = %e, "Failed to announce conversation to discovery");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Messages and turns
    // ═══════════════════════════════════════════════════════════════════════

    /// Full message list; empty when the engine cannot answer
    pub async fn messages(&self, handle: EngineHandle) -> Vec<Message> {
        let Ok(engine) = self.engine() else {
            return Vec::new();
        };
        engine.get_messages(handle).await.unwrap_or_else(|e| {
            warn!(%handle, error = %e, "Failed to read messages");
            Vec::new()
        })
    }

    pub async fn info(&self, handle: EngineHandle) -> Option<ConversationInfo> {
        let engine = self.engine().ok()?;
        match engine.get_info(handle).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%handle, error = %e, "Failed to read conversation info");
                None
            }
        }
    }

    /// Advisory: false while waiting for the peer or for unknown handles
    pub async fn may_send(&self, handle: EngineHandle) -> bool {
        self.info(handle)
            .await
            .map(|info| info.turn_state().may_send())
            .unwrap_or(false)
    }

    /// Send a message and return the turn state that follows.
    ///
    /// The engine decides; a send while waiting still reaches it and comes
    /// back as `NotYourTurn`.
    pub async fn send(&self, handle: EngineHandle, text: &str) -> ChatResult<TurnState> {
        let engine = self.engine()?;
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message must not be empty".into()));
        }

        engine.send_message(handle, text).await?;
        debug!(%handle, "Message sent");

        match engine.get_info(handle).await? {
            Some(info) => Ok(info.turn_state()),
            None => Err(ChatError::NotFound(handle.to_string())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync and peers
    // ═══════════════════════════════════════════════════════════════════════

    /// Manual sync. Runs alongside the scheduled cycle; returns messages added.
    pub async fn sync_now(&self) -> ChatResult<usize> {
        let engine = self.engine()?;
        let added = engine.sync_with_peers().await?;
        info!(added, "Manual sync finished");
        if added > 0 {
            self.detect_changes(engine.as_ref()).await;
        }
        Ok(added)
    }

    pub async fn add_peer(&self, host: &str, port: u16) -> ChatResult<()> {
        let engine = self.engine()?;
        let host = host.trim();
        if host.is_empty() {
            return Err(ChatError::Validation("peer host must not be empty".into()));
        }
        engine.add_peer(host, port).await?;
        info!(%host, port, "Peer added");
        Ok(())
    }

    /// Probe every registered peer now
    pub async fn refresh_peers(&self) -> PeerSnapshot {
        self.peers.refresh(self.sync_port).await
    }

    /// Engine health merged with the orchestrator's own view
    pub async fn status(&self) -> EngineStatus {
        let mut status = match &self.engine {
            Some(engine) => engine.get_status().await,
            None => EngineStatus::new(),
        };
        status.insert(
            "syncPort".into(),
            self.sync_port.map(i64::from).unwrap_or(-1).into(),
        );
        status.insert("ready".into(), self.engine.is_some().into());
        status
    }

    /// Push `Ready` again for a presentation layer that attached late
    pub fn announce_ready(&self) {
        self.sink.notify(Notification::Ready {
            sync_port: self.sync_port,
            stub_names: self.registry.stub_names(),
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cycles
    // ═══════════════════════════════════════════════════════════════════════

    /// One network sync tick. Returns false when skipped because another
    /// sync is still running or the engine is unavailable.
    pub async fn run_sync_cycle(&self) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };
        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync still in flight, skipping tick");
            return false;
        }
        let _guard = InFlightGuard(&self.sync_in_flight);

        self.sink.notify(Notification::SyncStart);
        let added = match engine.sync_with_peers().await {
            Ok(added) => added,
            Err(e) => {
                warn!(error = %e, "Sync with peers failed");
                return true;
            }
        };
        self.sink.notify(Notification::SyncDone { added });

        if added > 0 {
            self.detect_changes(engine.as_ref()).await;
        }

        let snapshot = self.refresh_peers().await;
        self.sink.notify(Notification::PeersUpdate {
            count: snapshot.count,
            peers: snapshot.peers,
        });
        true
    }

    /// One local poll tick
    pub async fn run_poll_cycle(&self) {
        if let Some(engine) = &self.engine {
            self.detect_changes(engine.as_ref()).await;
        }
    }

    async fn detect_changes(&self, engine: &dyn ConversationEngine) {
        let conversations = self.registry.loaded();
        if conversations.is_empty() {
            return;
        }
        for update in self.detector.scan(engine, &conversations).await {
            self.sink.notify(update);
        }
    }

    /// Tear the engine down within the configured grace period.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return ShutdownOutcome::Clean;
        }
        let Some(engine) = &self.engine else {
            return ShutdownOutcome::Clean;
        };

        info!("Shutting down conversation engine");
        match tokio::time::timeout(self.config.shutdown_grace(), engine.shutdown()).await {
            Ok(Ok(())) => ShutdownOutcome::Clean,
            Ok(Err(e)) => {
                warn!(error = %e, "Engine shutdown reported an error");
                ShutdownOutcome::Clean
            }
            Err(_) => {
                warn!(grace = ?self.config.shutdown_grace(), "Engine shutdown timed out");
                ShutdownOutcome::TimedOut
            }
        }
    }
}
