//! Core types shared by the engine contract and the orchestrator

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::turn::TurnState;

/// Opaque identifier the engine assigns to a loaded conversation.
///
/// Stable for the lifetime of the process once issued; never reused for a
/// different conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineHandle(pub u64);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single chat message as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Decrypted message text
    pub text: String,
    /// Whether the local party authored this message
    pub is_me: bool,
    /// Entity id of the author
    pub entity_id: String,
}

impl Message {
    pub fn new(text: impl Into<String>, is_me: bool, entity_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_me,
            entity_id: entity_id.into(),
        }
    }
}

/// What the engine hands back after a successful load, create or join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedConversation {
    pub handle: EngineHandle,
    pub user_key: String,
    pub secret_id: String,
    pub is_initiator: bool,
}

/// Per-conversation metadata from `get_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInfo {
    /// Raw turn-state code
    pub state: i32,
    pub is_initiator: bool,
    pub user_key: String,
    pub secret_id: String,
}

impl ConversationInfo {
    pub fn turn_state(&self) -> TurnState {
        TurnState::from_code(self.state)
    }
}

/// A loaded conversation held by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub name: String,
    pub handle: EngineHandle,
    pub user_key: String,
    pub secret_id: String,
    /// Fixed at create/join time
    pub is_initiator: bool,
}

impl Conversation {
    pub(crate) fn from_opened(name: impl Into<String>, opened: OpenedConversation) -> Self {
        Self {
            name: name.into(),
            handle: opened.handle,
            user_key: opened.user_key,
            secret_id: opened.secret_id,
            is_initiator: opened.is_initiator,
        }
    }
}

/// One row of [`ConversationRegistry::list_known`](crate::registry::ConversationRegistry::list_known)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub name: String,
    pub loaded: bool,
    pub handle: Option<EngineHandle>,
    pub user_key: Option<String>,
    pub secret_id: Option<String>,
    pub is_initiator: Option<bool>,
}

impl ConversationSummary {
    pub(crate) fn stub(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loaded: false,
            handle: None,
            user_key: None,
            secret_id: None,
            is_initiator: None,
        }
    }

    pub(crate) fn loaded(conv: &Conversation) -> Self {
        Self {
            name: conv.name.clone(),
            loaded: true,
            handle: Some(conv.handle),
            user_key: Some(conv.user_key.clone()),
            secret_id: Some(conv.secret_id.clone()),
            is_initiator: Some(conv.is_initiator),
        }
    }
}

/// Implementation-defined health map reported by the engine
pub type EngineStatus = serde_json::Map<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_camel_case() {
        let msg = Message::new("hi", true, "ab12");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"isMe\":true"));
        assert!(json.contains("\"entityId\":\"ab12\""));
    }

    #[test]
    fn test_handle_serializes_as_number() {
        let json = serde_json::to_string(&EngineHandle(3)).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn test_summary_of_loaded_conversation() {
        let conv = Conversation {
            name: "garden".into(),
            handle: EngineHandle(1),
            user_key: "u".repeat(32),
            secret_id: "s".repeat(32),
            is_initiator: true,
        };
        let summary = ConversationSummary::loaded(&conv);
        assert!(summary.loaded);
        assert_eq!(summary.handle, Some(EngineHandle(1)));
        assert_eq!(summary.is_initiator, Some(true));

        let stub = ConversationSummary::stub("garden");
        assert!(!stub.loaded);
        assert!(stub.handle.is_none());
    }
}
