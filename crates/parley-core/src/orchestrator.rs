//! Connection orchestrator: the top-level state machine.
//!
//! Reacts to transport lifecycle events, routes inbound messages to their
//! conversation session, replays conversations that received messages while
//! the offline backlog was being delivered, and coordinates shutdown.
//!
//! State transitions are applied synchronously inside [`ConnectionOrchestrator::dispatch`]
//! so they happen in event order; slower follow-up work (presence, sync
//! completion, credential purge) runs on tracked background tasks.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use parley_types::connection::ConnectionState;
use parley_types::conversation::ConversationId;
use parley_types::error::RepositoryError;
use parley_types::event::{InboundMessage, Presence, TransportEvent};

use crate::error::OrchestratorError;
use crate::session::conversation::Envelope;
use crate::session::pending::PendingSet;
use crate::session::registry::SessionRegistry;
use crate::session::responder::Responder;
use crate::store::{ConversationStore, StoreTransaction, TxOptions, settle, within};
use crate::transport::{Transport, advisory};

/// Mutable connection status, guarded by one lock.
struct Status {
    state: ConnectionState,
    /// Tracks messages dispatched but not yet recorded.
    recording: TaskTracker,
    /// When the current syncing phase started.
    syncing_since: Option<DateTime<Utc>>,
}

/// Work left over after a lifecycle event's state transition.
enum FollowUp {
    AnnouncePresence,
    CompleteSync,
    LoggedOut {
        on_connect: bool,
        is_logout_reason: bool,
    },
    Qr(Vec<String>),
}

struct Inner<S, T> {
    responder: Arc<Responder<S, T>>,
    registry: SessionRegistry<S, T>,
    pending_set: Arc<PendingSet>,
    status: Mutex<Status>,
    /// Background lifecycle tasks; drained at shutdown.
    tasks: TaskTracker,
    accepting: AtomicBool,
    fatal: CancellationToken,
    fatal_error: Mutex<Option<OrchestratorError>>,
}

/// Top-level state machine reacting to transport events.
///
/// Cheap to clone; clones share the same state.
pub struct ConnectionOrchestrator<S, T> {
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for ConnectionOrchestrator<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, T> ConnectionOrchestrator<S, T>
where
    S: ConversationStore,
    T: Transport,
{
    /// Create an orchestrator in the `Disconnected` state.
    pub fn new(responder: Arc<Responder<S, T>>) -> Self {
        let pending_set = Arc::new(PendingSet::new());
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(responder.clone(), pending_set.clone()),
                responder,
                pending_set,
                status: Mutex::new(Status {
                    state: ConnectionState::Disconnected,
                    recording: TaskTracker::new(),
                    syncing_since: None,
                }),
                tasks: TaskTracker::new(),
                accepting: AtomicBool::new(true),
                fatal: CancellationToken::new(),
                fatal_error: Mutex::new(None),
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn registry(&self) -> &SessionRegistry<S, T> {
        &self.inner.registry
    }

    pub fn pending_set(&self) -> &PendingSet {
        &self.inner.pending_set
    }

    /// Cancelled once a fatal lifecycle error has been recorded.
    pub fn fatal_token(&self) -> CancellationToken {
        self.inner.fatal.clone()
    }

    /// Take the recorded fatal error, if any.
    pub fn take_fatal_error(&self) -> Option<OrchestratorError> {
        self.inner
            .fatal_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    // -----------------------------------------------------------------------
    // Event entry points
    // -----------------------------------------------------------------------

    /// Route a transport event without waiting for its follow-up work.
    ///
    /// Message events are enqueued into their session before returning, which
    /// preserves per-conversation arrival order. Lifecycle follow-ups run on
    /// tracked background tasks.
    pub fn dispatch(&self, event: TransportEvent) {
        if let Some(follow_up) = self.begin(event) {
            let this = self.clone();
            self.inner.tasks.spawn(async move {
                if let Err(e) = this.follow_up(follow_up).await {
                    this.record_failure(e);
                }
            });
        }
    }

    /// Route a transport event and wait for its follow-up work to finish.
    pub async fn handle(&self, event: TransportEvent) -> Result<(), OrchestratorError> {
        let Some(follow_up) = self.begin(event) else {
            return Ok(());
        };
        let result = self.follow_up(follow_up).await;
        if let Err(e) = &result {
            self.signal_failure(e);
        }
        result
    }

    /// Apply the synchronous part of an event.
    fn begin(&self, event: TransportEvent) -> Option<FollowUp> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(kind = event.kind(), "orchestrator stopped, event ignored");
            return None;
        }

        match event {
            TransportEvent::Message(message) => {
                self.route(message);
                None
            }
            TransportEvent::Connected => {
                let mut status = self.status();
                status.state = ConnectionState::Syncing;
                status.syncing_since = Some(Utc::now());
                info!(state = %status.state, "transport connected");
                Some(FollowUp::AnnouncePresence)
            }
            TransportEvent::OfflineSyncStarted => {
                let mut status = self.status();
                if status.state == ConnectionState::Disconnected {
                    status.state = ConnectionState::Syncing;
                    status.syncing_since = Some(Utc::now());
                }
                info!(state = %status.state, "offline sync started");
                None
            }
            TransportEvent::OfflineSyncCompleted => {
                info!("offline sync completed, waiting for pending messages to be recorded");
                Some(FollowUp::CompleteSync)
            }
            TransportEvent::LoggedOut {
                on_connect,
                is_logout_reason,
            } => {
                self.status().state = ConnectionState::Disconnected;
                warn!(on_connect, is_logout_reason, "transport logged out");
                Some(FollowUp::LoggedOut {
                    on_connect,
                    is_logout_reason,
                })
            }
            TransportEvent::Qr { codes } => Some(FollowUp::Qr(codes)),
        }
    }

    /// Enqueue a message into its session with a snapshot of the current state.
    fn route(&self, message: InboundMessage) {
        let (state, recording) = {
            let status = self.status();
            (status.state, status.recording.token())
        };
        debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            %state,
            "routing message"
        );
        let session = self.inner.registry.get_or_create(&message.conversation_id);
        session.enqueue(Envelope {
            message,
            state,
            recording,
        });
    }

    async fn follow_up(&self, follow_up: FollowUp) -> Result<(), OrchestratorError> {
        match follow_up {
            FollowUp::AnnouncePresence => {
                advisory(
                    "presence",
                    self.inner
                        .responder
                        .transport()
                        .send_presence(Presence::Available),
                )
                .await;
                Ok(())
            }
            FollowUp::CompleteSync => {
                self.complete_sync().await;
                Ok(())
            }
            FollowUp::LoggedOut {
                on_connect,
                is_logout_reason,
            } => self.logged_out(on_connect, is_logout_reason).await,
            FollowUp::Qr(codes) => {
                if codes.is_empty() {
                    return Err(OrchestratorError::EmptyQr);
                }
                for code in &codes {
                    info!(%code, "pairing code received");
                }
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle handling
    // -----------------------------------------------------------------------

    /// Wait for backlog messages to be recorded, flip to `Synced`, then answer
    /// every conversation that received messages meanwhile, once each.
    async fn complete_sync(&self) {
        let tracker = self.status().recording.clone();
        tracker.close();
        let syncing_since = loop {
            tracker.wait().await;
            let mut status = self.status();
            // A message routed between the wait and the lock took a new token.
            if !tracker.is_empty() {
                continue;
            }
            status.recording = TaskTracker::new();
            if status.state == ConnectionState::Disconnected {
                info!("connection lost before sync completed, replay skipped");
                return;
            }
            status.state = ConnectionState::Synced;
            break status.syncing_since.take();
        };
        info!(state = %ConnectionState::Synced, "connection synced");

        let mut replay: BTreeSet<ConversationId> =
            self.inner.pending_set.drain().into_iter().collect();
        if let Some(since) = syncing_since {
            match self.conversations_since(since).await {
                Ok(ids) => replay.extend(ids),
                Err(e) => {
                    error!(error = %e, "failed to list messages recorded during sync");
                }
            }
        }
        if replay.is_empty() {
            return;
        }

        info!(conversations = replay.len(), "replaying conversations after sync");
        let mut replies = JoinSet::new();
        for conversation_id in replay {
            let session = self.inner.registry.get_or_create(&conversation_id);
            replies.spawn(async move {
                let result = session.respond_now().await;
                (conversation_id, result)
            });
        }
        while let Some(joined) = replies.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((conversation_id, Err(e))) => {
                    error!(%conversation_id, error = %e, "failed to reply after sync");
                }
                Err(e) => error!(error = %e, "replay task failed"),
            }
        }
    }

    async fn conversations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConversationId>, RepositoryError> {
        let settings = *self.inner.responder.settings();
        let messages = within(settings.message_timeout, async {
            let mut tx = self
                .inner
                .responder
                .store()
                .begin(TxOptions::read_only())
                .await?;
            let result = tx.all_messages_since(since).await;
            settle(tx, result, settings.rollback_timeout).await
        })
        .await?;
        Ok(messages.into_iter().map(|m| m.conversation_id).collect())
    }

    async fn logged_out(
        &self,
        on_connect: bool,
        is_logout_reason: bool,
    ) -> Result<(), OrchestratorError> {
        if on_connect && is_logout_reason {
            info!("purging transport credentials after logout");
            self.inner
                .responder
                .transport()
                .purge_credentials()
                .await
                .map_err(OrchestratorError::CredentialPurge)?;
        }
        Err(OrchestratorError::LoggedOut {
            on_connect,
            is_logout_reason,
        })
    }

    /// Log a lifecycle failure and keep it for `run` if it is fatal.
    fn record_failure(&self, error: OrchestratorError) {
        self.signal_failure(&error);
        if error.is_fatal() {
            let mut slot = self
                .inner
                .fatal_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.get_or_insert(error);
        }
    }

    fn signal_failure(&self, error: &OrchestratorError) {
        if error.is_fatal() {
            error!(error = %error, "fatal lifecycle error, stopping");
            self.inner.fatal.cancel();
        } else {
            error!(error = %error, "failed to handle lifecycle event");
        }
    }

    // -----------------------------------------------------------------------
    // Running and shutdown
    // -----------------------------------------------------------------------

    /// Connect the transport and pump its events until `shutdown` resolves,
    /// the event channel closes, or a fatal error occurs. Then shut down.
    ///
    /// Returns the fatal error, if one stopped the orchestrator.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), OrchestratorError> {
        self.inner
            .responder
            .transport()
            .connect()
            .await
            .map_err(OrchestratorError::Connect)?;

        let fatal = self.inner.fatal.clone();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = fatal.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        info!("transport event stream ended");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        match self.take_fatal_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop admitting events, drain in-flight work, close every session, and
    /// disconnect the transport.
    pub async fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down orchestrator");

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.registry.close_all().await;

        let transport = self.inner.responder.transport();
        advisory("presence", transport.send_presence(Presence::Unavailable)).await;
        transport.disconnect().await;
        self.status().state = ConnectionState::Disconnected;
        info!("orchestrator stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
