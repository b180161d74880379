//! Count-based change detection
//!
//! The engine gives no change feed, so every pass reads each loaded
//! conversation's message list and compares its length with the last one
//! seen. A mismatch produces a `MessagesUpdate` with the full list and the
//! freshly fetched turn state.
//!
//! The local poll and the post-sync pass can run at the same time. The
//! compare and the update happen under one lock acquisition, so only one of
//! them emits for a given change.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::ConversationEngine;
use crate::notify::Notification;
use crate::types::{Conversation, EngineHandle};

#[derive(Default)]
pub struct ChangeDetector {
    counts: Mutex<HashMap<EngineHandle, usize>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching a handle. Existing counts are left alone so a
    /// repeated open does not re-emit the whole history.
    pub fn track(&self, handle: EngineHandle) {
        self.counts.lock().entry(handle).or_insert(0);
    }

    pub fn forget(&self, handle: EngineHandle) {
        self.counts.lock().remove(&handle);
    }

    pub fn count(&self, handle: EngineHandle) -> Option<usize> {
        self.counts.lock().get(&handle).copied()
    }

    pub fn tracked(&self) -> usize {
        self.counts.lock().len()
    }

    /// One pass over `conversations`. Failures are logged per conversation
    /// and never stop the pass.
    pub async fn scan(
        &self,
        engine: &dyn ConversationEngine,
        conversations: &[Conversation],
    ) -> Vec<Notification> {
        let mut updates = Vec::new();

        for conv in conversations {
            let messages = match engine.get_messages(conv.handle).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(name = %conv.name, handle = %conv.handle, error = %e, "Failed to read messages");
                    continue;
                }
            };
            let count = messages.len();

            let previous = {
                let mut counts = self.counts.lock();
                let Some(last) = counts.get_mut(&conv.handle) else {
                    // Deleted since the snapshot was taken
                    continue;
                };
                if *last == count {
                    continue;
                }
                let previous = *last;
                *last = count;
                previous
            };

            if count < previous {
                warn!(name = %conv.name, previous, count, "Message count went down");
            }

            let turn_state = match engine.get_info(conv.handle).await {
                Ok(Some(info)) => info.turn_state(),
                Ok(None) => {
                    self.restore(conv.handle, count, previous);
                    debug!(name = %conv.name, "Conversation vanished during pass");
                    continue;
                }
                Err(e) => {
                    self.restore(conv.handle, count, previous);
                    warn!(name = %conv.name, error = %e, "Failed to read turn state");
                    continue;
                }
            };

            debug!(name = %conv.name, previous, count, %turn_state, "Messages changed");
            updates.push(Notification::MessagesUpdate {
                handle: conv.handle,
                name: conv.name.clone(),
                messages,
                turn_state,
            });
        }

        updates
    }

    /// Undo an update we could not report, unless someone moved it since
    fn restore(&self, handle: EngineHandle, current: usize, previous: usize) {
        let mut counts = self.counts.lock();
        if let Some(last) = counts.get_mut(&handle) {
            if *last == current {
                *last = previous;
            }
        }
    }
}
