//! Reply generation for one conversation.
//!
//! `Responder::respond` re-reads the full transcript, asks the completion
//! client for the next assistant turn, paces the reply behind a minimum delay,
//! sends it, and records it. Callers serialize calls per conversation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use parley_types::config::TimingConfig;
use parley_types::conversation::{ConversationId, StoredMessage};
use parley_types::error::RepositoryError;
use parley_types::event::SentReceipt;
use parley_types::llm::{MessageRole, Turn};

use crate::error::SessionError;
use crate::llm::client::CompletionClient;
use crate::store::{ConversationStore, StoreTransaction, TxOptions, settle, within};
use crate::transport::{Transport, advisory};

/// Timeouts and pacing applied by sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Floor between deciding to reply and dispatching the reply.
    pub min_reply_delay: Duration,
    /// Bound for single-message store operations.
    pub message_timeout: Duration,
    /// Bound for a whole respond cycle.
    pub respond_timeout: Duration,
    pub rollback_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for SessionSettings {
    fn from(config: &TimingConfig) -> Self {
        Self {
            min_reply_delay: config.min_reply_delay(),
            message_timeout: config.message_timeout(),
            respond_timeout: config.respond_timeout(),
            rollback_timeout: config.rollback_timeout(),
        }
    }
}

/// Shared reply machinery: store, transport, completion client and persona.
///
/// One instance serves every conversation.
pub struct Responder<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    completion: CompletionClient,
    persona: String,
    settings: SessionSettings,
}

impl<S, T> Responder<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        completion: CompletionClient,
        persona: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            transport,
            completion,
            persona: persona.into(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Generate and send a reply for `conversation_id`.
    ///
    /// The respond timeout bounds everything up to the send. Once the reply is
    /// out, recording it is bounded by the message timeout alone, so a slow
    /// store surfaces as `ReplyNotRecorded` rather than a plain timeout.
    ///
    /// Returns the receipt of the sent reply, or `None` when the completion
    /// produced nothing sendable.
    pub async fn respond(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<SentReceipt>, SessionError> {
        let span = info_span!("respond", conversation_id = %conversation_id);
        self.respond_inner(conversation_id).instrument(span).await
    }

    async fn respond_inner(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<SentReceipt>, SessionError> {
        let limit = self.settings.respond_timeout;
        let composed = tokio::time::timeout(limit, self.compose(conversation_id))
            .await
            .map_err(|_| SessionError::Timeout(limit))??;
        match composed {
            Some(text) => self.deliver(conversation_id, &text).await.map(Some),
            None => Ok(None),
        }
    }

    /// Produce the paced reply text, or `None` when there is nothing to send.
    async fn compose(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<String>, SessionError> {
        info!("responding to conversation");

        let history = self.load_history(conversation_id).await?;
        if history.is_empty() {
            return Err(SessionError::EmptyHistory(conversation_id.clone()));
        }

        advisory(
            "composing",
            self.transport.send_composing(conversation_id),
        )
        .await;
        let pacing = tokio::time::sleep(self.settings.min_reply_delay);

        let turns = self.build_turns(&history);
        let choice = self.completion.complete(turns).await?;
        if choice.role != MessageRole::Assistant {
            warn!(role = %choice.role, "completion top choice is not an assistant turn, not sending");
            return Ok(None);
        }
        let text = choice.content.trim();
        if text.is_empty() {
            warn!("completion returned blank text, not sending");
            return Ok(None);
        }

        pacing.await;
        Ok(Some(text.to_string()))
    }

    /// Send the reply, then record it. A send is never retracted.
    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<SentReceipt, SessionError> {
        let receipt = self
            .transport
            .send_message(conversation_id, text)
            .await?;
        debug!(message_id = %receipt.id, "reply sent");

        let reply = StoredMessage {
            id: receipt.id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: self.transport.self_id().to_string(),
            text: text.to_string(),
            sent_at: receipt.sent_at,
            recorded_at: Utc::now(),
        };
        if let Err(source) = self.record(&reply).await {
            error!(
                message_id = %reply.id,
                error = %source,
                "reply was sent but could not be recorded"
            );
            return Err(SessionError::ReplyNotRecorded {
                message_id: reply.id,
                source,
            });
        }

        Ok(receipt)
    }

    /// Persona turn first, then one turn per stored message.
    fn build_turns(&self, history: &[StoredMessage]) -> Vec<Turn> {
        let self_id = self.transport.self_id();
        let mut turns = Vec::with_capacity(history.len() + 1);
        turns.push(Turn::system(self.persona.clone()));
        turns.extend(history.iter().map(|message| {
            if message.sender_id == self_id {
                Turn::assistant(message.text.clone())
            } else {
                Turn::user(message.text.clone())
            }
        }));
        turns
    }

    async fn load_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let mut tx = self.store.begin(TxOptions::read_only()).await?;
        let result = tx.messages_for_conversation(conversation_id).await;
        settle(tx, result, self.settings.rollback_timeout).await
    }

    /// Whether the conversation is known to the store.
    pub(crate) async fn is_allowed(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, RepositoryError> {
        within(self.settings.message_timeout, async {
            let mut tx = self.store.begin(TxOptions::read_only()).await?;
            let result = tx.chat_exists(conversation_id).await;
            settle(tx, result, self.settings.rollback_timeout).await
        })
        .await
    }

    /// Persist one message, bounded by the message timeout.
    pub(crate) async fn record(&self, message: &StoredMessage) -> Result<(), RepositoryError> {
        within(self.settings.message_timeout, async {
            let mut tx = self.store.begin(TxOptions::read_write()).await?;
            let result = tx.append_message(message).await;
            settle(tx, result, self.settings.rollback_timeout).await
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
