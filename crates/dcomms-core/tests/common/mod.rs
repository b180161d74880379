//! Shared helpers for dcomms-core integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dcomms_core::types::{ConversationInfo, EngineHandle, EngineStatus, Message, OpenedConversation};
use dcomms_core::{
    BroadcastSink, ConversationEngine, EngineError, EngineResult, LoopbackHub, MemoryEngine, Notification,
    Orchestrator, OrchestratorConfig,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Engine wrapper that counts calls, can slow down network sync and can
/// make sync or teardown fail on demand
pub struct InstrumentedEngine {
    inner: MemoryEngine,
    sync_delay: Duration,
    pub fail_sync: AtomicBool,
    pub fail_destroy: AtomicBool,
    pub calls: AtomicUsize,
    pub loads: AtomicUsize,
    pub syncs: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl InstrumentedEngine {
    pub fn new(inner: MemoryEngine) -> Self {
        Self {
            inner,
            sync_delay: Duration::ZERO,
            fail_sync: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationEngine for InstrumentedEngine {
    async fn start_server(&self) -> EngineResult<u16> {
        self.hit();
        self.inner.start_server().await
    }

    async fn register_address(&self, port: u16) -> EngineResult<()> {
        self.hit();
        self.inner.register_address(port).await
    }

    async fn start_discovery(&self, port: u16, data_dir: &Path) -> EngineResult<()> {
        self.hit();
        self.inner.start_discovery(port, data_dir).await
    }

    async fn add_discovery_secret(&self, secret_id: &str) -> EngineResult<()> {
        self.hit();
        self.inner.add_discovery_secret(secret_id).await
    }

    async fn load_conversation(&self, name: &str, data_dir: &Path) -> EngineResult<OpenedConversation> {
        self.hit();
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_conversation(name, data_dir).await
    }

    async fn create_conversation(&self, name: &str) -> EngineResult<OpenedConversation> {
        self.hit();
        self.inner.create_conversation(name).await
    }

    async fn join_conversation(
        &self,
        name: &str,
        user_key: &str,
        secret_id: &str,
    ) -> EngineResult<OpenedConversation> {
        self.hit();
        self.inner.join_conversation(name, user_key, secret_id).await
    }

    async fn save_conversation(&self, handle: EngineHandle, name: &str, data_dir: &Path) -> EngineResult<()> {
        self.hit();
        self.inner.save_conversation(handle, name, data_dir).await
    }

    async fn get_messages(&self, handle: EngineHandle) -> EngineResult<Vec<Message>> {
        self.hit();
        self.inner.get_messages(handle).await
    }

    async fn get_info(&self, handle: EngineHandle) -> EngineResult<Option<ConversationInfo>> {
        self.hit();
        self.inner.get_info(handle).await
    }

    async fn send_message(&self, handle: EngineHandle, text: &str) -> EngineResult<()> {
        self.hit();
        self.inner.send_message(handle, text).await
    }

    async fn destroy_conversation(&self, handle: EngineHandle) -> EngineResult<()> {
        self.hit();
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("teardown failed".into()));
        }
        self.inner.destroy_conversation(handle).await
    }

    async fn sync_with_peers(&self) -> EngineResult<usize> {
        self.hit();
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.sync_delay.is_zero() {
            tokio::time::sleep(self.sync_delay).await;
        }
        let result = if self.fail_sync.load(Ordering::SeqCst) {
            Err(EngineError::Transient("peer connection reset".into()))
        } else {
            self.inner.sync_with_peers().await
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn add_peer(&self, host: &str, port: u16) -> EngineResult<()> {
        self.hit();
        self.inner.add_peer(host, port).await
    }

    async fn get_status(&self) -> EngineStatus {
        self.hit();
        self.inner.get_status().await
    }

    async fn shutdown(&self) -> EngineResult<()> {
        self.hit();
        self.inner.shutdown().await
    }
}

/// One party: its own data dir, a shared hub and peer registry
pub struct TestNode {
    pub orch: Arc<Orchestrator>,
    pub engine: Arc<InstrumentedEngine>,
    pub events: broadcast::Receiver<Notification>,
    pub config: OrchestratorConfig,
}

pub fn shared_dirs() -> TempDir {
    TempDir::new().unwrap()
}

pub async fn create_test_node(shared: &TempDir, name: &str) -> TestNode {
    create_test_node_with(shared, name, |engine| engine).await
}

pub async fn create_test_node_with(
    shared: &TempDir,
    name: &str,
    customize: impl FnOnce(InstrumentedEngine) -> InstrumentedEngine,
) -> TestNode {
    let config = OrchestratorConfig::new(shared.path().join(name))
        .with_peer_registry(shared.path().join("registry.db"))
        .with_intervals(Duration::from_millis(20), Duration::from_millis(20));
    let hub = LoopbackHub::new(shared.path().join("hub")).unwrap();
    let memory = MemoryEngine::new(config.peer_registry_path()).with_hub(hub);
    let engine = Arc::new(customize(InstrumentedEngine::new(memory)));

    let sink = BroadcastSink::new();
    let events = sink.subscribe();
    let orch = Orchestrator::start(config.clone(), engine.clone(), Arc::new(sink))
        .await
        .unwrap();

    TestNode {
        orch: Arc::new(orch),
        engine,
        events,
        config,
    }
}

/// Drain whatever is queued without waiting
pub fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Engine whose only conversation grows by however many messages a test
/// pushes. Everything else is unsupported.
pub struct ScriptedEngine {
    pub handle: EngineHandle,
    messages: parking_lot::Mutex<Vec<Message>>,
}

impl ScriptedEngine {
    pub fn new(handle: EngineHandle) -> Self {
        Self {
            handle,
            messages: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, n: usize) {
        let mut messages = self.messages.lock();
        for _ in 0..n {
            let text = format!("m{}", messages.len());
            messages.push(Message::new(text, false, "peer"));
        }
    }
}

fn unsupported<T>() -> EngineResult<T> {
    Err(EngineError::Failed("unsupported".into()))
}

#[async_trait]
impl ConversationEngine for ScriptedEngine {
    async fn start_server(&self) -> EngineResult<u16> {
        unsupported()
    }

    async fn register_address(&self, _port: u16) -> EngineResult<()> {
        unsupported()
    }

    async fn start_discovery(&self, _port: u16, _data_dir: &Path) -> EngineResult<()> {
        unsupported()
    }

    async fn load_conversation(&self, _name: &str, _data_dir: &Path) -> EngineResult<OpenedConversation> {
        unsupported()
    }

    async fn create_conversation(&self, _name: &str) -> EngineResult<OpenedConversation> {
        unsupported()
    }

    async fn join_conversation(&self, _: &str, _: &str, _: &str) -> EngineResult<OpenedConversation> {
        unsupported()
    }

    async fn save_conversation(&self, _: EngineHandle, _: &str, _: &Path) -> EngineResult<()> {
        unsupported()
    }

    async fn get_messages(&self, handle: EngineHandle) -> EngineResult<Vec<Message>> {
        if handle != self.handle {
            return Err(EngineError::UnknownHandle(handle));
        }
        Ok(self.messages.lock().clone())
    }

    async fn get_info(&self, handle: EngineHandle) -> EngineResult<Option<ConversationInfo>> {
        Ok((handle == self.handle).then(|| ConversationInfo {
            state: 0,
            is_initiator: true,
            user_key: "u".repeat(32),
            secret_id: "s".repeat(32),
        }))
    }

    async fn send_message(&self, _: EngineHandle, _: &str) -> EngineResult<()> {
        unsupported()
    }

    async fn destroy_conversation(&self, _: EngineHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn sync_with_peers(&self) -> EngineResult<usize> {
        Ok(0)
    }

    async fn add_peer(&self, _: &str, _: u16) -> EngineResult<()> {
        unsupported()
    }

    async fn get_status(&self) -> EngineStatus {
        EngineStatus::new()
    }
}
