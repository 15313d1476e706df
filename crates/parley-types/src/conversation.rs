//! Conversation and stored message types for Parley.
//!
//! A conversation is one addressable chat thread. Every message the bot sees
//! or sends is persisted as a [`StoredMessage`] keyed by its conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;

/// Opaque, stable identifier of a conversation.
///
/// Used as the key for session lookup and for stored messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message persisted in the conversation store.
///
/// Immutable once persisted. Within a conversation, messages are read back
/// ordered by `sent_at`, ties broken by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Provider-assigned unique message ID.
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    pub text: String,
    /// When the transport says the message was sent.
    pub sent_at: DateTime<Utc>,
    /// When this process persisted the message.
    pub recorded_at: DateTime<Utc>,
}

/// A conversation the bot is allowed to talk in.
///
/// Conversations without a chat record are never replied to or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
}
