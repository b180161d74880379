//! Conversation registry
//!
//! In-memory index of every conversation the node knows about, keyed by name.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  RegistryState                                                │
//! │  ├── stubs:   names found on disk (or created this session)   │
//! │  ├── loaded:  name → Conversation (engine handle + creds)     │
//! │  └── pending: names with a create/join still in the engine    │
//! └───────────────────────────────────────────────────────────────┘
//!
//!   stub ──open──► loaded ──delete──► (gone, file removed)
//!   create/join ─────► stub + loaded together
//! ```
//!
//! The lock is never held across an engine call. Engine work happens
//! between two short critical sections: one to check, one to commit.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{chat_file_in, CHAT_EXTENSION};
use crate::engine::ConversationEngine;
use crate::error::{ChatError, ChatResult};
use crate::types::{Conversation, ConversationSummary, EngineHandle};

#[derive(Default)]
struct RegistryState {
    stubs: BTreeSet<String>,
    loaded: BTreeMap<String, Conversation>,
    pending: HashSet<String>,
}

impl RegistryState {
    fn is_known(&self, name: &str) -> bool {
        self.stubs.contains(name) || self.loaded.contains_key(name) || self.pending.contains(name)
    }
}

/// Reject names that cannot be a single file name under the chats directory.
pub fn validate_name(name: &str) -> ChatResult<()> {
    if name.trim().is_empty() {
        return Err(ChatError::Validation("name must not be empty".into()));
    }
    if name == "." || name == ".." {
        return Err(ChatError::Validation(format!("invalid name: {}", name)));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(ChatError::Validation(format!(
            "name must not contain path separators: {}",
            name
        )));
    }
    Ok(())
}

/// How a finished engine load lands in the registry
enum OpenCommit {
    Committed,
    Duplicate(Conversation),
    Deleted,
}

/// Releases a pending create/join reservation on every exit path
struct PendingGuard<'a> {
    registry: &'a ConversationRegistry,
    name: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.state.write().pending.remove(&self.name);
    }
}

#[derive(Default)]
pub struct ConversationRegistry {
    state: RwLock<RegistryState>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed stubs from `<chats_dir>/*.chat`. A missing directory yields none.
    ///
    /// Returns the stub names found, sorted.
    pub async fn scan_stubs(&self, chats_dir: &Path) -> ChatResult<Vec<String>> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(chats_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(?chats_dir, "No chats directory yet");
                return Ok(found);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHAT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    found.push(stem.to_string());
                }
            }
        }

        found.sort();
        self.state.write().stubs.extend(found.iter().cloned());
        info!(count = found.len(), "Discovered conversation stubs");
        Ok(found)
    }

    pub fn stub_names(&self) -> Vec<String> {
        self.state.read().stubs.iter().cloned().collect()
    }

    /// Union of stubs and loaded conversations, one row per name, sorted.
    pub fn list_known(&self) -> Vec<ConversationSummary> {
        let state = self.state.read();
        let mut rows: BTreeMap<&str, ConversationSummary> = state
            .stubs
            .iter()
            .map(|name| (name.as_str(), ConversationSummary::stub(name.as_str())))
            .collect();
        for (name, conv) in &state.loaded {
            rows.insert(name.as_str(), ConversationSummary::loaded(conv));
        }
        rows.into_values().collect()
    }

    pub fn get(&self, name: &str) -> Option<Conversation> {
        self.state.read().loaded.get(name).cloned()
    }

    /// Snapshot of every loaded conversation
    pub fn loaded(&self) -> Vec<Conversation> {
        self.state.read().loaded.values().cloned().collect()
    }

    pub fn name_for(&self, handle: EngineHandle) -> Option<String> {
        self.state
            .read()
            .loaded
            .values()
            .find(|c| c.handle == handle)
            .map(|c| c.name.clone())
    }

    /// Open a conversation by name.
    ///
    /// Returns `(conversation, newly_loaded)`. A loaded conversation comes
    /// straight from the cache without touching the engine.
    pub async fn open(
        &self,
        engine: &dyn ConversationEngine,
        data_dir: &Path,
        name: &str,
    ) -> ChatResult<(Conversation, bool)> {
        {
            let state = self.state.read();
            if let Some(conv) = state.loaded.get(name) {
                debug!(%name, handle = %conv.handle, "Conversation already loaded");
                return Ok((conv.clone(), false));
            }
            if !state.stubs.contains(name) {
                return Err(ChatError::NotFound(name.to_string()));
            }
        }

        info!(%name, "Loading conversation");
        let opened = engine.load_conversation(name, data_dir).await?;
        let conv = Conversation::from_opened(name, opened);

        let outcome = {
            let mut state = self.state.write();
            if let Some(existing) = state.loaded.get(name) {
                OpenCommit::Duplicate(existing.clone())
            } else if !state.stubs.contains(name) {
                OpenCommit::Deleted
            } else {
                state.loaded.insert(name.to_string(), conv.clone());
                OpenCommit::Committed
            }
        };

        match outcome {
            OpenCommit::Committed => Ok((conv, true)),
            OpenCommit::Duplicate(existing) => {
                // Lost a race with a concurrent open of the same stub
                debug!(%name, duplicate = %conv.handle, "Dropping duplicate load");
                self.discard(engine, name, conv.handle).await;
                Ok((existing, false))
            }
            OpenCommit::Deleted => {
                // Deleted while the engine was still loading it
                info!(%name, handle = %conv.handle, "Conversation deleted during load");
                self.discard(engine, name, conv.handle).await;
                Err(ChatError::NotFound(name.to_string()))
            }
        }
    }

    async fn discard(&self, engine: &dyn ConversationEngine, name: &str, handle: EngineHandle) {
        if let Err(e) = engine.destroy_conversation(handle).await {
            warn!(%name, %handle, error = %e, "Failed to destroy discarded handle");
        }
    }

    /// Create a new conversation; the local party is the initiator.
    pub async fn create(
        &self,
        engine: &dyn ConversationEngine,
        data_dir: &Path,
        name: &str,
    ) -> ChatResult<Conversation> {
        validate_name(name)?;
        let _guard = self.reserve(name)?;

        info!(%name, "Creating conversation");
        let opened = engine.create_conversation(name).await?;
        self.persist_and_commit(engine, data_dir, name, Conversation::from_opened(name, opened))
            .await
    }

    /// Join an initiator's conversation; the local party is not the initiator.
    pub async fn join(
        &self,
        engine: &dyn ConversationEngine,
        data_dir: &Path,
        name: &str,
        user_key: &str,
        secret_id: &str,
    ) -> ChatResult<Conversation> {
        validate_name(name)?;
        let _guard = self.reserve(name)?;

        info!(%name, "Joining conversation");
        let opened = engine.join_conversation(name, user_key, secret_id).await?;
        self.persist_and_commit(engine, data_dir, name, Conversation::from_opened(name, opened))
            .await
    }

    /// Remove a conversation and its file.
    ///
    /// Unknown names succeed without doing anything. Returns the handle that
    /// was torn down, if the conversation was loaded.
    pub async fn delete(
        &self,
        engine: &dyn ConversationEngine,
        data_dir: &Path,
        name: &str,
    ) -> ChatResult<Option<EngineHandle>> {
        if validate_name(name).is_err() {
            debug!(%name, "Ignoring delete of invalid name");
            return Ok(None);
        }

        let loaded = self.get(name);
        if let Some(conv) = &loaded {
            engine.destroy_conversation(conv.handle).await?;
        }

        {
            let mut state = self.state.write();
            state.loaded.remove(name);
            state.stubs.remove(name);
        }

        let file = chat_file_in(data_dir, name);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => debug!(?file, "Removed conversation file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(?file, error = %e, "Failed to remove conversation file"),
        }

        info!(%name, "Deleted conversation");
        Ok(loaded.map(|c| c.handle))
    }

    fn reserve(&self, name: &str) -> ChatResult<PendingGuard<'_>> {
        let mut state = self.state.write();
        if state.is_known(name) {
            return Err(ChatError::AlreadyExists(name.to_string()));
        }
        state.pending.insert(name.to_string());
        Ok(PendingGuard {
            registry: self,
            name: name.to_string(),
        })
    }

    async fn persist_and_commit(
        &self,
        engine: &dyn ConversationEngine,
        data_dir: &Path,
        name: &str,
        conv: Conversation,
    ) -> ChatResult<Conversation> {
        if let Err(e) = engine.save_conversation(conv.handle, name, data_dir).await {
            warn!(%name, error = %e, "Failed to persist new conversation");
            if let Err(e) = engine.destroy_conversation(conv.handle).await {
                warn!(%name, error = %e, "Failed to destroy unsaved conversation");
            }
            return Err(ChatError::Engine(e.to_string()));
        }

        let mut state = self.state.write();
        state.stubs.insert(name.to_string());
        state.loaded.insert(name.to_string(), conv.clone());
        Ok(conv)
    }
}
