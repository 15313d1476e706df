//! Hand-written fakes shared by the core's unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use parley_types::config::DEFAULT_PERSONA;
use parley_types::conversation::{ConversationId, StoredMessage};
use parley_types::error::{RepositoryError, TransportError};
use parley_types::event::{InboundMessage, Presence, SentReceipt};
use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError, MessageRole, Turn};

use crate::llm::box_provider::BoxCompletionProvider;
use crate::llm::client::{CompletionClient, CompletionParams};
use crate::llm::provider::CompletionProvider;
use crate::llm::retry::RetryPolicy;
use crate::session::responder::{Responder, SessionSettings};
use crate::store::{ConversationStore, StoreTransaction, TxOptions};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    chats: HashSet<String>,
    messages: Vec<StoredMessage>,
    fail_appends: bool,
    append_delay: Option<Duration>,
    failed_appends: usize,
    commits: usize,
    rollbacks: usize,
}

/// In-memory store whose writes apply immediately. Clones share state.
#[derive(Clone, Default)]
pub struct TestStore {
    state: Arc<Mutex<StoreState>>,
}

impl TestStore {
    pub fn with_chats(chats: &[&str]) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().chats = chats.iter().map(|c| c.to_string()).collect();
        store
    }

    pub fn seed(&self, message: StoredMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<StoredMessage> {
        let state = self.state.lock().unwrap();
        ordered(&state.messages, conversation_id)
    }

    pub fn fail_appends(&self, fail: bool) {
        self.state.lock().unwrap().fail_appends = fail;
    }

    /// Hold every append for `delay` before applying it.
    pub fn delay_appends(&self, delay: Duration) {
        self.state.lock().unwrap().append_delay = Some(delay);
    }

    pub fn failed_appends(&self) -> usize {
        self.state.lock().unwrap().failed_appends
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

fn ordered(messages: &[StoredMessage], conversation_id: &ConversationId) -> Vec<StoredMessage> {
    let mut found: Vec<StoredMessage> = messages
        .iter()
        .filter(|m| &m.conversation_id == conversation_id)
        .cloned()
        .collect();
    found.sort_by_key(|m| m.sent_at);
    found
}

pub struct TestTx {
    state: Arc<Mutex<StoreState>>,
    read_only: bool,
}

impl ConversationStore for TestStore {
    type Tx = TestTx;

    async fn begin(&self, options: TxOptions) -> Result<TestTx, RepositoryError> {
        Ok(TestTx {
            state: self.state.clone(),
            read_only: options.read_only,
        })
    }
}

impl StoreTransaction for TestTx {
    async fn chat_exists(&mut self, conversation_id: &ConversationId) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().unwrap().chats.contains(conversation_id.as_str()))
    }

    async fn append_message(&mut self, message: &StoredMessage) -> Result<(), RepositoryError> {
        if self.read_only {
            return Err(RepositoryError::ReadOnly);
        }
        let delay = self.state.lock().unwrap().append_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_appends {
            state.failed_appends += 1;
            return Err(RepositoryError::Query("append rejected".to_string()));
        }
        if !state.messages.iter().any(|m| m.id == message.id) {
            state.messages.push(message.clone());
        }
        Ok(())
    }

    async fn messages_for_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        Ok(ordered(&self.state.lock().unwrap().messages, conversation_id))
    }

    async fn all_messages_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.recorded_at >= since)
            .cloned()
            .collect())
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportLog {
    read_receipts: Vec<String>,
    presences: Vec<Presence>,
    composing: Vec<ConversationId>,
    sent: Vec<(ConversationId, String)>,
    purges: usize,
    connected: bool,
    disconnected: bool,
    fail_hints: bool,
    fail_purge: bool,
    fail_connect: bool,
}

/// Transport that records every call. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl RecordingTransport {
    pub const SELF_ID: &'static str = "bot";

    pub fn new() -> Self {
        Self::default()
    }

    /// Make presence and composing hints fail.
    pub fn fail_hints(&self, fail: bool) {
        self.log.lock().unwrap().fail_hints = fail;
    }

    pub fn fail_purge(&self, fail: bool) {
        self.log.lock().unwrap().fail_purge = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.log.lock().unwrap().fail_connect = fail;
    }

    pub fn read_receipts(&self) -> Vec<String> {
        self.log.lock().unwrap().read_receipts.clone()
    }

    pub fn presences(&self) -> Vec<Presence> {
        self.log.lock().unwrap().presences.clone()
    }

    pub fn composing(&self) -> Vec<ConversationId> {
        self.log.lock().unwrap().composing.clone()
    }

    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn purges(&self) -> usize {
        self.log.lock().unwrap().purges
    }

    pub fn connected(&self) -> bool {
        self.log.lock().unwrap().connected
    }

    pub fn disconnected(&self) -> bool {
        self.log.lock().unwrap().disconnected
    }
}

impl Transport for RecordingTransport {
    fn self_id(&self) -> &str {
        Self::SELF_ID
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_connect {
            return Err(TransportError::NotConnected);
        }
        log.connected = true;
        Ok(())
    }

    async fn mark_read(
        &self,
        message_id: &str,
        _conversation_id: &ConversationId,
        _sender_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.log
            .lock()
            .unwrap()
            .read_receipts
            .push(message_id.to_string());
        Ok(())
    }

    async fn send_presence(&self, presence: Presence) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_hints {
            return Err(TransportError::Send("presence rejected".to_string()));
        }
        log.presences.push(presence);
        Ok(())
    }

    async fn send_composing(&self, conversation_id: &ConversationId) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_hints {
            return Err(TransportError::Send("composing rejected".to_string()));
        }
        log.composing.push(conversation_id.clone());
        Ok(())
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<SentReceipt, TransportError> {
        let mut log = self.log.lock().unwrap();
        log.sent.push((conversation_id.clone(), text.to_string()));
        Ok(SentReceipt {
            id: format!("out-{}", log.sent.len()),
            sent_at: Utc::now(),
        })
    }

    async fn purge_credentials(&self) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_purge {
            return Err(TransportError::Credentials("store locked".to_string()));
        }
        log.purges += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        self.log.lock().unwrap().disconnected = true;
    }
}

// ---------------------------------------------------------------------------
// Completion provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CallLog {
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Shared view of the calls a [`ScriptedProvider`] received.
#[derive(Clone, Default)]
pub struct ProviderCalls {
    log: Arc<CallLog>,
}

impl ProviderCalls {
    pub fn count(&self) -> usize {
        self.log.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.log.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.log.requests.lock().unwrap().last().cloned()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.log.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Provider that replays a script of results, then answers "ok".
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    calls: ProviderCalls,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, result: Result<CompletionResponse, LlmError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls_handle(&self) -> ProviderCalls {
        self.calls.clone()
    }

    pub fn response(choices: Vec<Turn>) -> CompletionResponse {
        CompletionResponse {
            id: "resp-1".to_string(),
            model: "scripted".to_string(),
            choices,
        }
    }
}

impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let log = &self.calls.log;
        log.requests.lock().unwrap().push(request.clone());
        let now = log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        log.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();

        log.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| reply("ok"))
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn reply(text: &str) -> Result<CompletionResponse, LlmError> {
    role_reply(MessageRole::Assistant, text)
}

pub fn role_reply(role: MessageRole, text: &str) -> Result<CompletionResponse, LlmError> {
    Ok(ScriptedProvider::response(vec![Turn {
        role,
        content: text.to_string(),
    }]))
}

pub fn api_error(status: u16) -> LlmError {
    LlmError::Api {
        status,
        message: format!("upstream returned {status}"),
    }
}

pub fn stored(id: &str, conversation: &str, sender: &str, text: &str) -> StoredMessage {
    let now = Utc::now();
    StoredMessage {
        id: id.to_string(),
        conversation_id: ConversationId::from(conversation),
        sender_id: sender.to_string(),
        text: text.to_string(),
        sent_at: now,
        recorded_at: now,
    }
}

pub fn inbound(id: &str, conversation: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        conversation_id: ConversationId::from(conversation),
        sender_id: conversation.to_string(),
        text: Some(text.to_string()),
        sent_at: Utc::now(),
    }
}

pub fn inbound_media(id: &str, conversation: &str) -> InboundMessage {
    InboundMessage {
        text: None,
        ..inbound(id, conversation, "")
    }
}

pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        min_reply_delay: Duration::from_millis(1),
        message_timeout: Duration::from_secs(2),
        respond_timeout: Duration::from_secs(5),
        rollback_timeout: Duration::from_secs(1),
    }
}

pub fn responder_with(
    store: &TestStore,
    transport: &RecordingTransport,
    provider: ScriptedProvider,
    settings: SessionSettings,
) -> Responder<TestStore, RecordingTransport> {
    let completion = CompletionClient::new(
        BoxCompletionProvider::new(provider),
        CompletionParams {
            model: "scripted".to_string(),
            max_tokens: 512,
            temperature: 0.0,
            stop: vec!["'''".to_string()],
        },
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        },
    );
    Responder::new(
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        completion,
        DEFAULT_PERSONA,
        settings,
    )
}
