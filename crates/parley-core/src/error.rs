//! Error types raised by the orchestration core.

use std::time::Duration;

use parley_types::conversation::ConversationId;
use parley_types::error::{RepositoryError, TransportError};
use parley_types::llm::LlmError;
use thiserror::Error;

/// Failure while processing one inbound event or computing one reply.
///
/// Contained to the event that produced it: the session loop logs it and moves
/// on to the next mailbox item.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("completion error: {0}")]
    Completion(#[from] LlmError),

    #[error("conversation {0} has no messages")]
    EmptyHistory(ConversationId),

    /// The reply reached the transport but could not be persisted.
    #[error("reply {message_id} was sent but not recorded: {source}")]
    ReplyNotRecorded {
        message_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("respond timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure while handling a connection lifecycle event.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("logged out (on_connect: {on_connect}, logout reason: {is_logout_reason})")]
    LoggedOut {
        on_connect: bool,
        is_logout_reason: bool,
    },

    #[error("failed to purge transport credentials: {0}")]
    CredentialPurge(#[source] TransportError),

    #[error("failed to connect transport: {0}")]
    Connect(#[source] TransportError),

    #[error("pairing challenge carried no codes")]
    EmptyQr,
}

impl OrchestratorError {
    /// Whether the error stops the orchestrator.
    ///
    /// A connection that was logged out or whose credentials could not be
    /// cleaned up can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OrchestratorError::EmptyQr)
    }
}
