//! Two-party turn-taking state
//!
//! The engine reports a small integer per conversation. The orchestrator
//! never stores it; it is re-fetched after every send and sync, and the
//! "may send" answer derived here is advisory. The engine still gets every
//! send call and is the one that rejects out-of-turn messages.

use std::fmt;

use serde::Serialize;

/// Engine code: the local party may send
pub const CODE_OPEN: i32 = 0;
/// Engine code: reserved by the engine, treated as sendable
pub const CODE_RESERVED: i32 = 1;
/// Engine code: waiting for the peer's message list
pub const CODE_WAITING: i32 = 2;

/// Turn state derived from an engine state code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum TurnState {
    /// Local party may send
    Open,
    /// Engine-specific extension point; sendable
    Reserved,
    /// Engine expects peer input before accepting a local send
    Waiting,
    /// A code this crate does not know about; sendable
    Other(i32),
}

impl TurnState {
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_OPEN => TurnState::Open,
            CODE_RESERVED => TurnState::Reserved,
            CODE_WAITING => TurnState::Waiting,
            other => TurnState::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            TurnState::Open => CODE_OPEN,
            TurnState::Reserved => CODE_RESERVED,
            TurnState::Waiting => CODE_WAITING,
            TurnState::Other(code) => code,
        }
    }

    /// True for every state except [`TurnState::Waiting`]
    pub fn may_send(self) -> bool {
        !matches!(self, TurnState::Waiting)
    }
}

impl Default for TurnState {
    fn default() -> Self {
        TurnState::Open
    }
}

impl From<TurnState> for i32 {
    fn from(state: TurnState) -> Self {
        state.code()
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Open => write!(f, "Open"),
            TurnState::Reserved => write!(f, "Reserved"),
            TurnState::Waiting => write!(f, "Waiting for peer"),
            TurnState::Other(code) => write!(f, "Engine state {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_waiting_blocks_send() {
        assert!(TurnState::from_code(CODE_OPEN).may_send());
        assert!(TurnState::from_code(CODE_RESERVED).may_send());
        assert!(!TurnState::from_code(CODE_WAITING).may_send());
        assert!(TurnState::from_code(17).may_send());
        assert!(TurnState::from_code(-1).may_send());
    }

    #[test]
    fn test_code_roundtrip() {
        for code in [-3, 0, 1, 2, 9] {
            assert_eq!(TurnState::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_serializes_as_code() {
        assert_eq!(serde_json::to_string(&TurnState::Waiting).unwrap(), "2");
        assert_eq!(serde_json::to_string(&TurnState::Other(5)).unwrap(), "5");
    }

    #[test]
    fn test_default_is_open() {
        assert_eq!(TurnState::default(), TurnState::Open);
    }
}
