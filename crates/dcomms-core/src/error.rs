//! Error types for dcomms

use thiserror::Error;

use crate::types::EngineHandle;

/// Main error type for orchestrator operations
///
/// Every user-triggered operation (open, create, join, send, delete) returns
/// one of these. Periodic cycles never surface them; they log and move on.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Referenced conversation is not known to the registry
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Name collides with an existing stub or loaded conversation
    #[error("Conversation already exists: {0}")]
    AlreadyExists(String),

    /// The conversation engine failed to initialize at startup
    #[error("Conversation engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Opaque failure reported by the conversation engine
    #[error("Engine error: {0}")]
    Engine(String),

    /// Send rejected by the turn-taking protocol
    #[error("Not your turn")]
    NotYourTurn,

    /// Sync or probe failure, retried on the next cycle
    #[error("Network error: {0}")]
    NetworkTransient(String),

    /// Malformed input caught before any engine call
    #[error("Invalid input: {0}")]
    Validation(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    /// Stable machine-readable name of the error kind
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::AlreadyExists(_) => "already_exists",
            ChatError::EngineUnavailable(_) => "engine_unavailable",
            ChatError::Engine(_) => "engine_error",
            ChatError::NotYourTurn => "not_your_turn",
            ChatError::NetworkTransient(_) => "network_transient",
            ChatError::Validation(_) => "validation",
            ChatError::Io(_) => "io",
            ChatError::Serialization(_) => "serialization",
        }
    }
}

/// Failures reported by a [`ConversationEngine`](crate::engine::ConversationEngine)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused a send because the peer has the turn
    #[error("Not your turn")]
    NotYourTurn,

    /// No conversation is loaded under this handle
    #[error("Unknown conversation handle: {0}")]
    UnknownHandle(EngineHandle),

    /// Peer exchange failed; expected to recover on its own
    #[error("Transient network failure: {0}")]
    Transient(String),

    /// Anything else
    #[error("{0}")]
    Failed(String),
}

/// Result type alias for engine calls
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for ChatError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotYourTurn => ChatError::NotYourTurn,
            EngineError::Transient(msg) => ChatError::NetworkTransient(msg),
            other => ChatError::Engine(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::NotFound("lunch".to_string());
        assert_eq!(format!("{}", err), "Conversation not found: lunch");
        assert_eq!(ChatError::NotYourTurn.to_string(), "Not your turn");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChatError = io_err.into();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[test]
    fn test_engine_error_mapping() {
        assert!(matches!(
            ChatError::from(EngineError::NotYourTurn),
            ChatError::NotYourTurn
        ));
        assert!(matches!(
            ChatError::from(EngineError::Transient("timeout".into())),
            ChatError::NetworkTransient(_)
        ));

        let err = ChatError::from(EngineError::UnknownHandle(EngineHandle(7)));
        match err {
            ChatError::Engine(msg) => assert!(msg.contains('7')),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
