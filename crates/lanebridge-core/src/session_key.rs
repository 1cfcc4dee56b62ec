//! Canonical session addressing (spec §3 "SessionKey", §4.3 key-string format).
//!
//! Grounded on the teacher's `PlatformKeyBuilder` (`telegram:dm:{user_id}`
//! style keys), generalized from the closed `{dm, group, channel, thread}`
//! chat-type set to the spec's `{channel, chat, user, user_chat}` tagging
//! and given an explicit parser so the format round-trips (spec P8).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A canonical, parseable identity for one conversation routed through the
/// gateway. Serializes to `channelId:kind:chatId[:userId]` per spec §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionKey {
    /// Keyed purely on the channel — one session per whole integration
    /// (rare; mostly useful for channel-wide broadcast bots).
    Channel { channel_id: String },
    /// Keyed on `(channelId, chatId)`. Requires a non-empty `chatId`.
    Chat { channel_id: String, chat_id: String },
    /// Keyed on `(channelId, userId)`. Requires a non-empty `userId`.
    User { channel_id: String, user_id: String },
    /// Keyed on `(channelId, chatId, userId)`. Requires both non-empty.
    UserChat {
        channel_id: String,
        chat_id: String,
        user_id: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionKeyError {
    #[error("session key segment must not be empty")]
    EmptySegment,
    #[error("session key segment must not contain ':'")]
    ColonInSegment,
    #[error("unknown session key kind {0:?}")]
    UnknownKind(String),
    #[error("malformed session key {0:?}: wrong number of segments")]
    Malformed(String),
}

fn validate_segment(s: &str) -> Result<(), SessionKeyError> {
    if s.is_empty() {
        return Err(SessionKeyError::EmptySegment);
    }
    if s.contains(':') {
        return Err(SessionKeyError::ColonInSegment);
    }
    Ok(())
}

impl SessionKey {
    pub fn channel(channel_id: impl Into<String>) -> Result<Self, SessionKeyError> {
        let channel_id = channel_id.into();
        validate_segment(&channel_id)?;
        Ok(Self::Channel { channel_id })
    }

    pub fn chat(
        channel_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, SessionKeyError> {
        let channel_id = channel_id.into();
        let chat_id = chat_id.into();
        validate_segment(&channel_id)?;
        validate_segment(&chat_id)?;
        Ok(Self::Chat { channel_id, chat_id })
    }

    pub fn user(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, SessionKeyError> {
        let channel_id = channel_id.into();
        let user_id = user_id.into();
        validate_segment(&channel_id)?;
        validate_segment(&user_id)?;
        Ok(Self::User { channel_id, user_id })
    }

    pub fn user_chat(
        channel_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, SessionKeyError> {
        let channel_id = channel_id.into();
        let chat_id = chat_id.into();
        let user_id = user_id.into();
        validate_segment(&channel_id)?;
        validate_segment(&chat_id)?;
        validate_segment(&user_id)?;
        Ok(Self::UserChat {
            channel_id,
            chat_id,
            user_id,
        })
    }

    /// The channel this key is scoped under, present on every variant.
    pub fn channel_id(&self) -> &str {
        match self {
            SessionKey::Channel { channel_id }
            | SessionKey::Chat { channel_id, .. }
            | SessionKey::User { channel_id, .. }
            | SessionKey::UserChat { channel_id, .. } => channel_id,
        }
    }

    /// The chat this key is scoped under, if any (used to build lane keys).
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            SessionKey::Chat { chat_id, .. } | SessionKey::UserChat { chat_id, .. } => {
                Some(chat_id)
            }
            _ => None,
        }
    }

    fn kind_token(&self) -> &'static str {
        match self {
            SessionKey::Channel { .. } => "channel",
            SessionKey::Chat { .. } => "chat",
            SessionKey::User { .. } => "user",
            SessionKey::UserChat { .. } => "user_chat",
        }
    }

    /// Parse the canonical string form produced by [`SessionKey::to_string`].
    pub fn parse(s: &str) -> Result<Self, SessionKeyError> {
        let segments: Vec<&str> = s.split(':').collect();
        let (channel_id, kind, rest) = match segments.as_slice() {
            [channel_id, kind, rest @ ..] => (*channel_id, *kind, rest),
            _ => return Err(SessionKeyError::Malformed(s.to_string())),
        };
        validate_segment(channel_id)?;

        match (kind, rest) {
            ("channel", []) => SessionKey::channel(channel_id),
            ("chat", [chat_id]) => SessionKey::chat(channel_id, *chat_id),
            ("user", [user_id]) => SessionKey::user(channel_id, *user_id),
            ("user_chat", [chat_id, user_id]) => {
                SessionKey::user_chat(channel_id, *chat_id, *user_id)
            }
            ("channel" | "chat" | "user" | "user_chat", _) => {
                Err(SessionKeyError::Malformed(s.to_string()))
            }
            (other, _) => Err(SessionKeyError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Channel { channel_id } => write!(f, "{channel_id}:{}", self.kind_token()),
            SessionKey::Chat { channel_id, chat_id } => {
                write!(f, "{channel_id}:{}:{chat_id}", self.kind_token())
            }
            SessionKey::User { channel_id, user_id } => {
                write!(f, "{channel_id}:{}:{user_id}", self.kind_token())
            }
            SessionKey::UserChat {
                channel_id,
                chat_id,
                user_id,
            } => write!(f, "{channel_id}:{}:{chat_id}:{user_id}", self.kind_token()),
        }
    }
}
