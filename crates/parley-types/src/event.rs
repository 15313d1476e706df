//! Transport lifecycle and message events.
//!
//! `TransportEvent` is the closed set of things a messaging transport can tell
//! the orchestrator. Adapters translate their native events into these
//! variants and hand them to `ConnectionOrchestrator::dispatch`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;

/// An inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    /// `None` for media, reactions and other non-text payloads.
    pub text: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl InboundMessage {
    /// The textual payload, if the message carries a non-empty one.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Events emitted by a messaging transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// The transport established its connection.
    Connected,

    /// The transport was logged out or its stream failed.
    LoggedOut {
        /// The failure happened while (re)connecting rather than mid-stream.
        on_connect: bool,
        /// The server reported a genuine logout, so stored credentials are void.
        is_logout_reason: bool,
    },

    /// Pairing codes to present to the operator.
    Qr { codes: Vec<String> },

    /// Delivery of the offline backlog has started.
    OfflineSyncStarted,

    /// Delivery of the offline backlog has finished.
    OfflineSyncCompleted,

    /// A message in some conversation.
    Message(InboundMessage),
}

impl TransportEvent {
    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::LoggedOut { .. } => "logged_out",
            TransportEvent::Qr { .. } => "qr",
            TransportEvent::OfflineSyncStarted => "offline_sync_started",
            TransportEvent::OfflineSyncCompleted => "offline_sync_completed",
            TransportEvent::Message(_) => "message",
        }
    }
}

/// Presence broadcast to contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Unavailable,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Presence::Available => write!(f, "available"),
            Presence::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// What the transport reports back after sending a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentReceipt {
    pub id: String,
    pub sent_at: DateTime<Utc>,
}
