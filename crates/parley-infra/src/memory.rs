//! Process-local conversation store.
//!
//! Same semantics as the SQLite store without the file: writes are staged in
//! the transaction (visible to its own reads), applied on commit, and
//! discarded on rollback or drop. Used by `parley serve --memory`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::store::{ConversationStore, StoreTransaction, TxOptions};
use parley_types::conversation::{Chat, ConversationId, StoredMessage};
use parley_types::error::RepositoryError;

#[derive(Default)]
struct MemoryState {
    chats: BTreeMap<ConversationId, DateTime<Utc>>,
    /// Committed messages in insertion order.
    messages: Vec<StoredMessage>,
}

/// In-memory implementation of `ConversationStore`. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryConversationStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn allow_chat(&self, conversation_id: &ConversationId) -> Chat {
        let mut state = self.state.write().await;
        let created_at = *state
            .chats
            .entry(conversation_id.clone())
            .or_insert_with(Utc::now);
        Chat {
            id: conversation_id.clone(),
            created_at,
        }
    }

    pub async fn list_chats(&self) -> Vec<Chat> {
        let state = self.state.read().await;
        let mut chats: Vec<Chat> = state
            .chats
            .iter()
            .map(|(id, created_at)| Chat {
                id: id.clone(),
                created_at: *created_at,
            })
            .collect();
        chats.sort_by_key(|c| c.created_at);
        chats
    }
}

pub struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    staged: Vec<StoredMessage>,
    read_only: bool,
}

impl MemoryTransaction {
    /// Committed messages followed by this transaction's staged ones, filtered.
    async fn visible<F>(&self, keep: F) -> Vec<StoredMessage>
    where
        F: Fn(&StoredMessage) -> bool,
    {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .chain(self.staged.iter())
            .filter(|m| keep(m))
            .cloned()
            .collect()
    }
}

impl ConversationStore for MemoryConversationStore {
    type Tx = MemoryTransaction;

    async fn begin(&self, options: TxOptions) -> Result<MemoryTransaction, RepositoryError> {
        Ok(MemoryTransaction {
            state: self.state.clone(),
            staged: Vec::new(),
            read_only: options.read_only,
        })
    }
}

impl StoreTransaction for MemoryTransaction {
    async fn chat_exists(&mut self, conversation_id: &ConversationId) -> Result<bool, RepositoryError> {
        Ok(self.state.read().await.chats.contains_key(conversation_id))
    }

    async fn append_message(&mut self, message: &StoredMessage) -> Result<(), RepositoryError> {
        if self.read_only {
            return Err(RepositoryError::ReadOnly);
        }
        let known = self.staged.iter().any(|m| m.id == message.id)
            || self
                .state
                .read()
                .await
                .messages
                .iter()
                .any(|m| m.id == message.id);
        if !known {
            self.staged.push(message.clone());
        }
        Ok(())
    }

    async fn messages_for_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let mut messages = self
            .visible(|m| &m.conversation_id == conversation_id)
            .await;
        // Stable: equal `sent_at` keeps insertion order.
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    async fn all_messages_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        Ok(self.visible(|m| m.recorded_at >= since).await)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        for message in self.staged {
            if !state.messages.iter().any(|m| m.id == message.id) {
                state.messages.push(message);
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
