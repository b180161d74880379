//! In-process conversation engine
//!
//! `MemoryEngine` implements the full engine contract without the native
//! library: conversations live in memory and are persisted as JSON chat
//! files, the sync server is a plain TCP listener on loopback (so liveness
//! probes succeed), and peers exchange messages through a [`LoopbackHub`].
//!
//! Turn protocol: the initiator starts `OPEN` and the joiner `WAITING`. A
//! successful send moves the sender to `WAITING`; integrating at least one
//! peer message during sync moves it back to `OPEN`.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::hub::{HubEntry, LoopbackHub};
use super::ConversationEngine;
use crate::config::chat_file_in;
use crate::error::{EngineError, EngineResult};
use crate::turn::{CODE_OPEN, CODE_WAITING};
use crate::types::{ConversationInfo, EngineHandle, EngineStatus, Message, OpenedConversation};

/// Persisted form of one conversation (`<name>.chat`)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatFile {
    user_key: String,
    secret_id: String,
    is_initiator: bool,
    entity_id: String,
    state: i32,
    messages: Vec<Message>,
    /// Hub lines already consumed
    cursor: usize,
    /// Sent but not yet published to the hub
    outbox: Vec<HubEntry>,
}

struct LoadedChat {
    name: String,
    chat: ChatFile,
    /// Set once the conversation has been saved
    file: Option<PathBuf>,
}

#[derive(Default)]
struct EngineState {
    chats: HashMap<EngineHandle, LoadedChat>,
    next_handle: u64,
    sync_port: Option<u16>,
    server: Option<JoinHandle<()>>,
    registered: bool,
    discovery_started: bool,
    discovery_secrets: Vec<String>,
}

impl EngineState {
    fn insert(&mut self, name: &str, chat: ChatFile, file: Option<PathBuf>) -> OpenedConversation {
        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        let opened = OpenedConversation {
            handle,
            user_key: chat.user_key.clone(),
            secret_id: chat.secret_id.clone(),
            is_initiator: chat.is_initiator,
        };
        self.chats.insert(
            handle,
            LoadedChat {
                name: name.to_string(),
                chat,
                file,
            },
        );
        opened
    }

    fn chat_mut(&mut self, handle: EngineHandle) -> EngineResult<&mut LoadedChat> {
        self.chats
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle))
    }
}

pub struct MemoryEngine {
    peer_registry: PathBuf,
    hub: Option<LoopbackHub>,
    kdf_delay: Duration,
    state: Mutex<EngineState>,
    /// Serializes overlapping sync calls (manual trigger vs. timer)
    sync_lock: tokio::sync::Mutex<()>,
}

impl MemoryEngine {
    /// Engine that registers itself in `peer_registry` and does not exchange
    /// messages with anyone until a hub is attached.
    pub fn new(peer_registry: impl Into<PathBuf>) -> Self {
        Self {
            peer_registry: peer_registry.into(),
            hub: None,
            kdf_delay: Duration::ZERO,
            state: Mutex::new(EngineState::default()),
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_hub(mut self, hub: LoopbackHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Simulated key-derivation time for load/create/join
    pub fn with_kdf_delay(mut self, delay: Duration) -> Self {
        self.kdf_delay = delay;
        self
    }

    async fn derive_keys(&self) {
        if !self.kdf_delay.is_zero() {
            tokio::time::sleep(self.kdf_delay).await;
        }
    }

    fn append_registry_line(&self, line: &str) -> EngineResult<()> {
        if let Ok(existing) = fs::read_to_string(&self.peer_registry) {
            if existing.lines().any(|l| l.trim() == line) {
                return Ok(());
            }
        }
        if let Some(parent) = self.peer_registry.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.peer_registry)
            .map_err(failed)?;
        writeln!(file, "{}", line).map_err(failed)
    }
}

fn failed(err: impl std::fmt::Display) -> EngineError {
    EngineError::Failed(err.to_string())
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn write_chat_file(path: &Path, chat: &ChatFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(chat)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, json)
}

/// Rewrite a saved conversation after a mutation; unsaved ones stay in memory
fn persist(snapshot: Option<(PathBuf, ChatFile)>) {
    if let Some((path, chat)) = snapshot {
        if let Err(e) = write_chat_file(&path, &chat) {
            warn!(?path, error = %e, "Failed to persist conversation");
        }
    }
}

#[async_trait]
impl ConversationEngine for MemoryEngine {
    async fn start_server(&self) -> EngineResult<u16> {
        if let Some(port) = self.state.lock().sync_port {
            return Ok(port);
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(failed)?;
        let port = listener.local_addr().map_err(failed)?.port();

        // Accept and drop; peers only probe reachability
        let server = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Accepted sync connection");
                        drop(stream);
                    }
                    Err(e) => {
                        warn!(error = %e, "Sync server accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        });

        let mut state = self.state.lock();
        state.sync_port = Some(port);
        state.server = Some(server);
        info!(port, "Loopback sync server listening");
        Ok(port)
    }

    async fn register_address(&self, port: u16) -> EngineResult<()> {
        self.append_registry_line(&format!("127.0.0.1:{}", port))?;
        self.state.lock().registered = true;
        Ok(())
    }

    async fn start_discovery(&self, port: u16, data_dir: &Path) -> EngineResult<()> {
        debug!(port, ?data_dir, "Loopback engine has no DHT; discovery is the hub");
        self.state.lock().discovery_started = true;
        Ok(())
    }

    async fn add_discovery_secret(&self, secret_id: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.discovery_secrets.iter().any(|s| s == secret_id) {
            state.discovery_secrets.push(secret_id.to_string());
        }
        Ok(())
    }

    async fn load_conversation(
        &self,
        name: &str,
        data_dir: &Path,
    ) -> EngineResult<OpenedConversation> {
        let path = chat_file_in(data_dir, name);
        let raw = fs::read_to_string(&path)
            .map_err(|e| EngineError::Failed(format!("Failed to load chat '{}': {}", name, e)))?;
        let chat: ChatFile = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Failed(format!("Corrupt chat file '{}': {}", name, e)))?;

        self.derive_keys().await;

        let opened = self.state.lock().insert(name, chat, Some(path));
        debug!(%name, handle = %opened.handle, "Loaded conversation");
        Ok(opened)
    }

    async fn create_conversation(&self, name: &str) -> EngineResult<OpenedConversation> {
        self.derive_keys().await;

        let chat = ChatFile {
            user_key: random_hex(16),
            secret_id: random_hex(16),
            is_initiator: true,
            entity_id: random_hex(8),
            state: CODE_OPEN,
            messages: Vec::new(),
            cursor: 0,
            outbox: Vec::new(),
        };
        Ok(self.state.lock().insert(name, chat, None))
    }

    async fn join_conversation(
        &self,
        name: &str,
        user_key: &str,
        secret_id: &str,
    ) -> EngineResult<OpenedConversation> {
        self.derive_keys().await;

        let chat = ChatFile {
            user_key: user_key.to_string(),
            secret_id: secret_id.to_string(),
            is_initiator: false,
            entity_id: random_hex(8),
            state: CODE_WAITING,
            messages: Vec::new(),
            cursor: 0,
            outbox: Vec::new(),
        };
        Ok(self.state.lock().insert(name, chat, None))
    }

    async fn save_conversation(
        &self,
        handle: EngineHandle,
        name: &str,
        data_dir: &Path,
    ) -> EngineResult<()> {
        let path = chat_file_in(data_dir, name);
        let chat = {
            let mut state = self.state.lock();
            let loaded = state.chat_mut(handle)?;
            loaded.name = name.to_string();
            loaded.file = Some(path.clone());
            loaded.chat.clone()
        };
        write_chat_file(&path, &chat).map_err(failed)
    }

    async fn get_messages(&self, handle: EngineHandle) -> EngineResult<Vec<Message>> {
        let mut state = self.state.lock();
        Ok(state.chat_mut(handle)?.chat.messages.clone())
    }

    async fn get_info(&self, handle: EngineHandle) -> EngineResult<Option<ConversationInfo>> {
        let state = self.state.lock();
        Ok(state.chats.get(&handle).map(|loaded| ConversationInfo {
            state: loaded.chat.state,
            is_initiator: loaded.chat.is_initiator,
            user_key: loaded.chat.user_key.clone(),
            secret_id: loaded.chat.secret_id.clone(),
        }))
    }

    async fn send_message(&self, handle: EngineHandle, text: &str) -> EngineResult<()> {
        let snapshot = {
            let mut state = self.state.lock();
            let loaded = state.chat_mut(handle)?;
            if loaded.chat.state == CODE_WAITING {
                return Err(EngineError::NotYourTurn);
            }

            let entity_id = loaded.chat.entity_id.clone();
            loaded
                .chat
                .messages
                .push(Message::new(text, true, entity_id.clone()));
            loaded.chat.outbox.push(HubEntry {
                from: entity_id,
                text: text.to_string(),
            });
            loaded.chat.state = CODE_WAITING;
            loaded.file.clone().map(|path| (path, loaded.chat.clone()))
        };
        persist(snapshot);
        Ok(())
    }

    async fn destroy_conversation(&self, handle: EngineHandle) -> EngineResult<()> {
        if let Some(loaded) = self.state.lock().chats.remove(&handle) {
            debug!(name = %loaded.name, %handle, "Destroyed conversation");
        }
        Ok(())
    }

    async fn sync_with_peers(&self) -> EngineResult<usize> {
        let Some(hub) = &self.hub else {
            return Ok(0);
        };
        let _guard = self.sync_lock.lock().await;

        // Take outboxes and cursors; the hub is read without the state lock
        let pending: Vec<(EngineHandle, String, String, usize, Vec<HubEntry>)> = {
            let mut state = self.state.lock();
            state
                .chats
                .iter_mut()
                .map(|(handle, loaded)| {
                    (
                        *handle,
                        loaded.chat.secret_id.clone(),
                        loaded.chat.entity_id.clone(),
                        loaded.chat.cursor,
                        std::mem::take(&mut loaded.chat.outbox),
                    )
                })
                .collect()
        };

        let mut added = 0;
        let mut first_error = None;
        for (handle, secret_id, entity_id, cursor, outbox) in pending {
            if let Err(e) = hub.publish(&secret_id, &outbox) {
                // Put unpublished entries back for the next attempt
                if let Some(loaded) = self.state.lock().chats.get_mut(&handle) {
                    let mut requeued = outbox;
                    requeued.append(&mut loaded.chat.outbox);
                    loaded.chat.outbox = requeued;
                }
                first_error.get_or_insert(e);
                continue;
            }

            let (entries, next_cursor) = match hub.read_from(&secret_id, cursor) {
                Ok(read) => read,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            let snapshot = {
                let mut state = self.state.lock();
                let Some(loaded) = state.chats.get_mut(&handle) else {
                    // Destroyed while we were reading
                    continue;
                };
                let incoming: Vec<Message> = entries
                    .into_iter()
                    .filter(|entry| entry.from != entity_id)
                    .map(|entry| Message::new(entry.text, false, entry.from))
                    .collect();
                loaded.chat.cursor = next_cursor;
                if !incoming.is_empty() {
                    added += incoming.len();
                    loaded.chat.messages.extend(incoming);
                    loaded.chat.state = CODE_OPEN;
                }
                loaded.file.clone().map(|path| (path, loaded.chat.clone()))
            };
            persist(snapshot);
        }

        match first_error {
            Some(e) if added == 0 => Err(EngineError::Transient(e.to_string())),
            Some(e) => {
                warn!(error = %e, added, "Partial loopback sync");
                Ok(added)
            }
            None => Ok(added),
        }
    }

    async fn add_peer(&self, host: &str, port: u16) -> EngineResult<()> {
        self.append_registry_line(&format!("{}:{}", host, port))
    }

    async fn get_status(&self) -> EngineStatus {
        let state = self.state.lock();
        let mut status = EngineStatus::new();
        status.insert(
            "syncPort".into(),
            state
                .sync_port
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        );
        status.insert("syncStarted".into(), state.registered.into());
        status.insert("dhtStarted".into(), state.discovery_started.into());
        status.insert("chatCount".into(), state.chats.len().into());
        status.insert(
            "discoverySecrets".into(),
            state.discovery_secrets.len().into(),
        );
        status.insert("hub".into(), self.hub.is_some().into());
        status
    }

    async fn shutdown(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        if let Some(server) = state.server.take() {
            server.abort();
        }
        state.sync_port = None;
        state.registered = false;
        state.discovery_started = false;
        info!("Loopback engine stopped");
        Ok(())
    }
}
