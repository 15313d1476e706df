//! Messaging transport port.
//!
//! The transport delivers [`TransportEvent`](parley_types::event::TransportEvent)s
//! to the orchestrator and accepts outbound operations from sessions. It is
//! shared by every session, so all operations take `&self`.

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::warn;

use parley_types::conversation::ConversationId;
use parley_types::error::TransportError;
use parley_types::event::{Presence, SentReceipt};

/// Outbound side of a messaging transport.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
/// Implementations live in parley-infra (e.g., `ConsoleTransport`).
pub trait Transport: Send + Sync + 'static {
    /// Sender ID the transport uses for messages this process sends.
    fn self_id(&self) -> &str;

    /// Open the connection. Lifecycle events follow on the transport's event channel.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Acknowledge a message as read. Acknowledging twice is not an error.
    fn mark_read(
        &self,
        message_id: &str,
        conversation_id: &ConversationId,
        sender_id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_presence(
        &self,
        presence: Presence,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Hint to the other side that a reply is being composed.
    fn send_composing(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> impl Future<Output = Result<SentReceipt, TransportError>> + Send;

    /// Delete the stored session credentials so the next start requires pairing.
    fn purge_credentials(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Run a best-effort transport call.
///
/// Presence and composing hints are advisory: a failure is logged and
/// swallowed so it never fails the enclosing operation.
pub async fn advisory<F>(what: &'static str, call: F)
where
    F: Future<Output = Result<(), TransportError>>,
{
    if let Err(error) = call.await {
        warn!(%error, call = what, "advisory transport call failed");
    }
}
