//! Per-conversation session: ordered mailbox, single processing loop, and the
//! reply decision.
//!
//! Each inbound message event goes through these steps, one event at a time:
//!
//! 1. admission: conversations unknown to the store are dropped
//! 2. read receipt
//! 3. non-text payloads stop here
//! 4. under the conversation lock, the message is persisted
//! 5. sync gate: events snapshotted before the connection was synced are
//!    reported to the [`PendingSet`] instead of answered
//! 6. coalescing gate: if more text messages are queued behind this one, the
//!    reply is left to the last of them
//! 7. respond, still under the conversation lock
//!
//! The pending count is raised when a text-bearing event is enqueued and
//! lowered once the event has passed the gates, so a burst that is already
//! sitting in the mailbox collapses into a single reply computed from the full
//! transcript.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error};

use parley_types::connection::ConnectionState;
use parley_types::conversation::{ConversationId, StoredMessage};
use parley_types::event::{InboundMessage, SentReceipt};

use crate::error::SessionError;
use crate::store::ConversationStore;
use crate::transport::Transport;

use super::pending::PendingSet;
use super::responder::Responder;

/// One inbound message event queued for a session.
pub struct Envelope {
    pub message: InboundMessage,
    /// Connection state at dispatch time.
    pub state: ConnectionState,
    /// Held until the message has been recorded (or dropped).
    pub recording: TaskTrackerToken,
}

/// Handle to a running conversation session.
///
/// Cheap to clone. The mailbox stays open while any handle is alive; the
/// registry holds the long-lived one.
pub struct ConversationSession<S, T> {
    id: ConversationId,
    mailbox: mpsc::UnboundedSender<Envelope>,
    pending: Arc<AtomicUsize>,
    respond_lock: Arc<Mutex<()>>,
    responder: Arc<Responder<S, T>>,
}

impl<S, T> Clone for ConversationSession<S, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            mailbox: self.mailbox.clone(),
            pending: self.pending.clone(),
            respond_lock: self.respond_lock.clone(),
            responder: self.responder.clone(),
        }
    }
}

impl<S, T> ConversationSession<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    /// Create the session handle and the processing loop that drains its mailbox.
    ///
    /// The caller spawns the returned loop.
    pub fn new(
        id: ConversationId,
        responder: Arc<Responder<S, T>>,
        pending_set: Arc<PendingSet>,
    ) -> (Self, SessionLoop<S, T>) {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let session = Self {
            id,
            mailbox,
            pending: Arc::new(AtomicUsize::new(0)),
            respond_lock: Arc::new(Mutex::new(())),
            responder,
        };
        let processing = SessionLoop {
            session: session.clone_inner(),
            inbox,
            pending_set,
        };
        (session, processing)
    }

    /// Copy of the shared state without a mailbox sender, so the loop does
    /// not keep its own mailbox open.
    fn clone_inner(&self) -> SessionState<S, T> {
        SessionState {
            id: self.id.clone(),
            pending: self.pending.clone(),
            respond_lock: self.respond_lock.clone(),
            responder: self.responder.clone(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Text-bearing events enqueued but not yet past the reply gates.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue an event. Events are processed strictly in enqueue order.
    ///
    /// Returns `false` if the session loop has already stopped.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        let counted = envelope.message.text().is_some();
        if counted {
            self.pending.fetch_add(1, Ordering::SeqCst);
        }
        match self.mailbox.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                if counted {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                debug!(conversation_id = %self.id, "session mailbox closed, event dropped");
                false
            }
        }
    }

    /// Generate a reply outside the mailbox (offline backlog replay).
    ///
    /// Serialized with the session loop through the conversation lock.
    pub async fn respond_now(&self) -> Result<Option<SentReceipt>, SessionError> {
        let _guard = self.respond_lock.lock().await;
        self.responder.respond(&self.id).await
    }
}

struct SessionState<S, T> {
    id: ConversationId,
    pending: Arc<AtomicUsize>,
    respond_lock: Arc<Mutex<()>>,
    responder: Arc<Responder<S, T>>,
}

impl<S, T> SessionState<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    /// Admission, read receipt, persistence and the reply gates.
    async fn admit(
        &self,
        envelope: Envelope,
        pending_set: &PendingSet,
    ) -> Result<Decision, SessionError> {
        let Envelope {
            message,
            state,
            recording,
        } = envelope;
        let responder = &self.responder;

        if !responder.is_allowed(&message.conversation_id).await? {
            debug!(message_id = %message.id, "conversation is not allowed, event dropped");
            return Ok(Decision::Skip);
        }

        responder
            .transport()
            .mark_read(
                &message.id,
                &message.conversation_id,
                &message.sender_id,
                Utc::now(),
            )
            .await?;

        let Some(text) = message.text() else {
            debug!(message_id = %message.id, "message carries no text, not recorded");
            return Ok(Decision::Skip);
        };

        let guard = self.respond_lock.clone().lock_owned().await;

        responder
            .record(&StoredMessage {
                id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                sender_id: message.sender_id.clone(),
                text: text.to_string(),
                sent_at: message.sent_at,
                recorded_at: Utc::now(),
            })
            .await?;

        if !state.is_synced() {
            pending_set.report(&message.conversation_id);
            drop(recording);
            debug!(message_id = %message.id, %state, "not synced, reply deferred until sync completes");
            return Ok(Decision::Skip);
        }
        drop(recording);

        let pending = self.pending.load(Ordering::SeqCst);
        if pending > 1 {
            debug!(message_id = %message.id, pending, "more messages queued, reply deferred to the last one");
            return Ok(Decision::Skip);
        }

        Ok(Decision::Respond(guard))
    }
}

/// What the gates decided for one event.
enum Decision {
    /// Respond while still holding the conversation lock.
    Respond(OwnedMutexGuard<()>),
    Skip,
}

/// The single consumer of a session's mailbox.
pub struct SessionLoop<S, T> {
    session: SessionState<S, T>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    pending_set: Arc<PendingSet>,
}

impl<S, T> SessionLoop<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    /// Process events until every handle is dropped and the mailbox is drained.
    pub async fn run(mut self) {
        debug!("session loop started");
        while let Some(envelope) = self.inbox.recv().await {
            let message_id = envelope.message.id.clone();
            let counted = envelope.message.text().is_some();

            let decision = self.session.admit(envelope, &self.pending_set).await;
            if counted {
                self.session.pending.fetch_sub(1, Ordering::SeqCst);
            }

            match decision {
                Ok(Decision::Respond(_guard)) => {
                    if let Err(e) = self.session.responder.respond(&self.session.id).await {
                        error!(%message_id, error = %e, "failed to respond to conversation");
                    }
                }
                Ok(Decision::Skip) => {}
                Err(e) => {
                    error!(%message_id, error = %e, "failed to handle conversation message");
                }
            }
        }
        debug!("session loop stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::task::TaskTracker;

    use parley_types::llm::{MessageRole, Turn};

    use crate::testing::{
        RecordingTransport, ScriptedProvider, TestStore, fast_settings, inbound, inbound_media,
        responder_with, stored,
    };

    struct Harness {
        store: TestStore,
        transport: RecordingTransport,
        calls: crate::testing::ProviderCalls,
        pending_set: Arc<PendingSet>,
        tracker: TaskTracker,
        session: ConversationSession<TestStore, RecordingTransport>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn new(conversation: &str, store: TestStore, provider: ScriptedProvider) -> Self {
            let transport = RecordingTransport::new();
            let calls = provider.calls_handle();
            let responder = Arc::new(responder_with(&store, &transport, provider, fast_settings()));
            let pending_set = Arc::new(PendingSet::new());
            let (session, processing) = ConversationSession::new(
                ConversationId::from(conversation),
                responder,
                pending_set.clone(),
            );
            let handle = tokio::spawn(processing.run());
            Self {
                store,
                transport,
                calls,
                pending_set,
                tracker: TaskTracker::new(),
                session,
                handle,
            }
        }

        fn send(&self, message: InboundMessage, state: ConnectionState) {
            assert!(self.session.enqueue(Envelope {
                message,
                state,
                recording: self.tracker.token(),
            }));
        }

        /// Close the mailbox and wait for the loop to drain it.
        async fn finish(self) -> (TestStore, RecordingTransport, crate::testing::ProviderCalls, Arc<PendingSet>) {
            let Harness {
                store,
                transport,
                calls,
                pending_set,
                session,
                handle,
                ..
            } = self;
            drop(session);
            handle.await.unwrap();
            (store, transport, calls, pending_set)
        }
    }

    #[tokio::test]
    async fn test_first_message_is_recorded_read_and_answered() {
        let harness = Harness::new("A", TestStore::with_chats(&["A"]), ScriptedProvider::new());
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Synced);
        let (store, transport, calls, _) = harness.finish().await;

        let history = store.messages(&ConversationId::from("A"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "m1");
        assert_eq!(history[1].sender_id, RecordingTransport::SELF_ID);
        assert_eq!(transport.read_receipts(), vec!["m1".to_string()]);
        assert_eq!(calls.count(), 1);
        assert_eq!(
            calls.last_request().unwrap().turns[1..],
            [Turn::user("hi")]
        );
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_dropped() {
        let store = TestStore::with_chats(&[]);
        store.seed(stored("m0", "A", "A", "earlier"));
        let harness = Harness::new("A", store, ScriptedProvider::new());
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Synced);
        let (store, transport, calls, _) = harness.finish().await;

        assert_eq!(store.messages(&ConversationId::from("A")).len(), 1);
        assert!(transport.read_receipts().is_empty());
        assert!(transport.sent().is_empty());
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn test_non_text_message_is_read_but_not_recorded() {
        let harness = Harness::new("A", TestStore::with_chats(&["A"]), ScriptedProvider::new());
        harness.send(inbound_media("m1", "A"), ConnectionState::Synced);
        let (store, transport, calls, _) = harness.finish().await;

        assert_eq!(transport.read_receipts(), vec!["m1".to_string()]);
        assert!(store.messages(&ConversationId::from("A")).is_empty());
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_reply() {
        let harness = Harness::new("B", TestStore::with_chats(&["B"]), ScriptedProvider::new());
        harness.send(inbound("m1", "B", "one"), ConnectionState::Synced);
        harness.send(inbound("m2", "B", "two"), ConnectionState::Synced);
        harness.send(inbound("m3", "B", "three"), ConnectionState::Synced);
        assert_eq!(harness.session.pending(), 3);
        let (store, transport, calls, _) = harness.finish().await;

        let inbound_rows: Vec<_> = store
            .messages(&ConversationId::from("B"))
            .into_iter()
            .filter(|m| m.sender_id != RecordingTransport::SELF_ID)
            .collect();
        assert_eq!(inbound_rows.len(), 3);
        assert_eq!(calls.count(), 1);
        let users: Vec<String> = calls
            .last_request()
            .unwrap()
            .turns
            .into_iter()
            .filter(|t| t.role == MessageRole::User)
            .map(|t| t.content)
            .collect();
        assert_eq!(users, vec!["one", "two", "three"]);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_non_text_event_does_not_block_coalesced_reply() {
        let harness = Harness::new("B", TestStore::with_chats(&["B"]), ScriptedProvider::new());
        harness.send(inbound("m1", "B", "one"), ConnectionState::Synced);
        harness.send(inbound_media("m2", "B"), ConnectionState::Synced);
        assert_eq!(harness.session.pending(), 1);
        let (_, transport, calls, _) = harness.finish().await;

        assert_eq!(calls.count(), 1);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_spaced_messages_each_get_a_reply() {
        let harness = Harness::new("A", TestStore::with_chats(&["A"]), ScriptedProvider::new());
        harness.send(inbound("m1", "A", "first"), ConnectionState::Synced);
        while harness.transport.sent().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        harness.send(inbound("m2", "A", "second"), ConnectionState::Synced);
        let (_, transport, calls, _) = harness.finish().await;

        assert_eq!(calls.count(), 2);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_syncing_snapshot_defers_reply() {
        let harness = Harness::new("A", TestStore::with_chats(&["A"]), ScriptedProvider::new());
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Syncing);
        harness.send(inbound("m2", "A", "again"), ConnectionState::Syncing);
        let tracker = harness.tracker.clone();
        let (store, transport, calls, pending_set) = harness.finish().await;

        assert_eq!(store.messages(&ConversationId::from("A")).len(), 2);
        assert_eq!(transport.read_receipts().len(), 2);
        assert_eq!(calls.count(), 0);
        assert_eq!(pending_set.drain(), vec![ConversationId::from("A")]);
        // Every recording token was released.
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_message_is_not_duplicated() {
        let harness = Harness::new("A", TestStore::with_chats(&["A"]), ScriptedProvider::new());
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Syncing);
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Syncing);
        let (store, transport, _, _) = harness.finish().await;

        assert_eq!(store.messages(&ConversationId::from("A")).len(), 1);
        assert_eq!(transport.read_receipts(), vec!["m1".to_string(), "m1".to_string()]);
    }

    #[tokio::test]
    async fn test_store_failure_is_contained_to_one_event() {
        let store = TestStore::with_chats(&["A"]);
        store.fail_appends(true);
        let harness = Harness::new("A", store, ScriptedProvider::new());
        harness.send(inbound("m1", "A", "lost"), ConnectionState::Synced);
        while harness.store.failed_appends() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        harness.store.fail_appends(false);
        harness.send(inbound("m2", "A", "kept"), ConnectionState::Synced);
        let (store, transport, calls, _) = harness.finish().await;

        let texts: Vec<String> = store
            .messages(&ConversationId::from("A"))
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts[0], "kept");
        assert_eq!(calls.count(), 1);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_respond_now_is_serialized_with_loop() {
        let provider = ScriptedProvider::new().with_delay(std::time::Duration::from_millis(30));
        let store = TestStore::with_chats(&["A"]);
        store.seed(stored("m0", "A", "A", "hello"));
        let harness = Harness::new("A", store, provider);

        let replay = harness.session.clone();
        let replay_task = tokio::spawn(async move { replay.respond_now().await });
        harness.send(inbound("m1", "A", "hi"), ConnectionState::Synced);
        replay_task.await.unwrap().unwrap();
        let (_, _, calls, _) = harness.finish().await;

        assert_eq!(calls.count(), 2);
        assert_eq!(calls.max_in_flight(), 1);
    }
}
