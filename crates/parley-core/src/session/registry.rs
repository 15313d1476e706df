//! Lookup-or-create of conversation sessions.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span};

use parley_types::conversation::ConversationId;

use crate::store::ConversationStore;
use crate::transport::Transport;

use super::conversation::ConversationSession;
use super::pending::PendingSet;
use super::responder::Responder;

/// Owns one [`ConversationSession`] per conversation for the process lifetime.
///
/// Sessions are created lazily and never removed while running; `close_all`
/// finalizes them at shutdown.
pub struct SessionRegistry<S, T> {
    sessions: DashMap<ConversationId, ConversationSession<S, T>>,
    loops: TaskTracker,
    responder: Arc<Responder<S, T>>,
    pending_set: Arc<PendingSet>,
}

impl<S, T> SessionRegistry<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    pub fn new(responder: Arc<Responder<S, T>>, pending_set: Arc<PendingSet>) -> Self {
        Self {
            sessions: DashMap::new(),
            loops: TaskTracker::new(),
            responder,
            pending_set,
        }
    }

    /// Return the session for `conversation_id`, creating and starting it if needed.
    ///
    /// Creation and the map insert happen under the same shard lock, so
    /// concurrent callers always observe a single session per conversation.
    pub fn get_or_create(&self, conversation_id: &ConversationId) -> ConversationSession<S, T> {
        if let Some(session) = self.sessions.get(conversation_id) {
            return session.clone();
        }
        self.sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                let (session, processing) = ConversationSession::new(
                    conversation_id.clone(),
                    self.responder.clone(),
                    self.pending_set.clone(),
                );
                let span = info_span!("session", conversation_id = %conversation_id);
                self.loops.spawn(processing.run().instrument(span));
                debug!(conversation_id = %conversation_id, "session started");
                session
            })
            .clone()
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<ConversationSession<S, T>> {
        self.sessions.get(conversation_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every mailbox and wait for each session loop to drain and exit.
    pub async fn close_all(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        self.loops.close();
        self.loops.wait().await;
        info!(sessions = count, "all sessions closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::connection::ConnectionState;
    use tokio_util::task::TaskTracker;

    use crate::session::conversation::Envelope;
    use crate::testing::{
        RecordingTransport, ScriptedProvider, TestStore, fast_settings, inbound, responder_with,
    };

    fn registry(store: &TestStore, transport: &RecordingTransport) -> SessionRegistry<TestStore, RecordingTransport> {
        let responder = Arc::new(responder_with(
            store,
            transport,
            ScriptedProvider::new(),
            fast_settings(),
        ));
        SessionRegistry::new(responder, Arc::new(PendingSet::new()))
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_session() {
        let registry = registry(&TestStore::with_chats(&["A"]), &RecordingTransport::new());
        let id = ConversationId::from("A");

        let first = registry.get_or_create(&id);
        first.enqueue(Envelope {
            message: inbound("m1", "A", "hi"),
            state: ConnectionState::Syncing,
            recording: TaskTracker::new().token(),
        });
        let second = registry.get_or_create(&id);

        assert_eq!(registry.len(), 1);
        assert_eq!(second.id(), &id);
        assert!(registry.get(&ConversationId::from("B")).is_none());
        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_lookups_create_one_session() {
        let registry = Arc::new(registry(
            &TestStore::with_chats(&["A"]),
            &RecordingTransport::new(),
        ));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.spawn(async move {
                registry.get_or_create(&ConversationId::from("A"));
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(registry.len(), 1);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_close_all_drains_mailboxes() {
        let store = TestStore::with_chats(&["A", "B"]);
        let transport = RecordingTransport::new();
        let registry = registry(&store, &transport);
        let tracker = TaskTracker::new();
        for (id, conversation) in [("m1", "A"), ("m2", "B"), ("m3", "A")] {
            registry
                .get_or_create(&ConversationId::from(conversation))
                .enqueue(Envelope {
                    message: inbound(id, conversation, "hello"),
                    state: ConnectionState::Syncing,
                    recording: tracker.token(),
                });
        }

        registry.close_all().await;

        assert!(registry.is_empty());
        assert_eq!(store.messages(&ConversationId::from("A")).len(), 2);
        assert_eq!(store.messages(&ConversationId::from("B")).len(), 1);
        assert!(tracker.is_empty());
    }
}
