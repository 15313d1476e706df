//! Conversation store ports.
//!
//! The orchestration core talks to persistence through caller-managed
//! transactions: `ConversationStore::begin` opens a [`StoreTransaction`], the
//! caller runs its operations on it, and [`settle`] commits or rolls back
//! depending on the outcome.
//!
//! Implementations live in parley-infra (e.g., `SqliteConversationStore`).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use parley_types::conversation::{ConversationId, StoredMessage};
use parley_types::error::RepositoryError;

/// Transaction isolation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read_committed"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

/// Options for [`ConversationStore::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    /// Read-committed, read-only. Used for admission checks and history loads.
    pub fn read_only() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            read_only: true,
        }
    }

    /// Read-committed, read-write. Used for appending messages.
    pub fn read_write() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
        }
    }
}

/// Entry point of a conversation store.
///
/// Shared by every session, so implementations must support concurrent
/// transactions.
pub trait ConversationStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Open a transaction with the given options.
    fn begin(
        &self,
        options: TxOptions,
    ) -> impl Future<Output = Result<Self::Tx, RepositoryError>> + Send;
}

/// Operations available inside a store transaction.
///
/// Dropping a transaction without committing discards its writes.
pub trait StoreTransaction: Send {
    /// Whether the conversation is known to the store (allowed to talk in).
    fn chat_exists(
        &mut self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Append a message. Appending a message ID that already exists is a no-op.
    fn append_message(
        &mut self,
        message: &StoredMessage,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// All messages of a conversation, ordered by `sent_at` then insertion order.
    fn messages_for_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, RepositoryError>> + Send;

    /// Every message recorded at or after `since`, across conversations.
    fn all_messages_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, RepositoryError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Finish a transaction according to the outcome of the work done in it.
///
/// Commits on `Ok`. On `Err` the transaction is rolled back, bounded by
/// `rollback_timeout`; rollback failures are logged and the original error is
/// returned.
pub async fn settle<Tx, T>(
    tx: Tx,
    result: Result<T, RepositoryError>,
    rollback_timeout: Duration,
) -> Result<T, RepositoryError>
where
    Tx: StoreTransaction,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            match tokio::time::timeout(rollback_timeout, tx.rollback()).await {
                Ok(Ok(())) => {}
                Ok(Err(rollback_error)) => {
                    warn!(error = %rollback_error, "failed to roll back transaction");
                }
                Err(_) => {
                    warn!(?rollback_timeout, "rollback timed out");
                }
            }
            Err(e)
        }
    }
}

/// Bound a store operation by `limit`, mapping expiry to `RepositoryError::Timeout`.
pub async fn within<T, F>(limit: Duration, operation: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| RepositoryError::Timeout(limit))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
