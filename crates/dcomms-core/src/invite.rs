//! Invite codes for joining a conversation
//!
//! An invite code is the initiator's `user_key` followed by the
//! conversation's `secret_id`, 32 characters each. The code is validated
//! here so malformed input never reaches the engine.

use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Characters in each half of an invite code
pub const KEY_LEN: usize = 32;

/// Total characters in an invite code
pub const INVITE_LEN: usize = KEY_LEN * 2;

/// A validated 64-character invite code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteCode {
    user_key: String,
    secret_id: String,
}

impl InviteCode {
    /// Build an invite from its two halves
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Validation` unless both halves are exactly
    /// [`KEY_LEN`] characters.
    pub fn from_parts(
        user_key: impl Into<String>,
        secret_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let user_key = user_key.into();
        let secret_id = secret_id.into();
        check_half("user key", &user_key)?;
        check_half("secret id", &secret_id)?;
        Ok(Self {
            user_key,
            secret_id,
        })
    }

    /// Parse a pasted invite code (surrounding whitespace is ignored)
    pub fn parse(code: &str) -> Result<Self, ChatError> {
        let code = code.trim();
        let len = code.chars().count();
        if len != INVITE_LEN {
            return Err(ChatError::Validation(format!(
                "Invite code must be {} characters, got {}",
                INVITE_LEN, len
            )));
        }

        // Split on a char boundary; multi-byte input would otherwise panic
        let split_at = code
            .char_indices()
            .nth(KEY_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(code.len());
        let (user_key, secret_id) = code.split_at(split_at);
        Self::from_parts(user_key, secret_id)
    }

    pub fn user_key(&self) -> &str {
        &self.user_key
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    pub fn into_parts(self) -> (String, String) {
        (self.user_key, self.secret_id)
    }
}

fn check_half(what: &str, value: &str) -> Result<(), ChatError> {
    let len = value.chars().count();
    if len != KEY_LEN {
        return Err(ChatError::Validation(format!(
            "Invite {} must be {} characters, got {}",
            what, KEY_LEN, len
        )));
    }
    Ok(())
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.user_key, self.secret_id)
    }
}

impl FromStr for InviteCode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
