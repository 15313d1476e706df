//! Development transport backed by the terminal.
//!
//! Reads `<conversation_id>: <text>` lines from stdin and turns each into a
//! `Message` event; replies and typing hints are printed to stdout. On
//! connect it plays the lifecycle a real network would: `Connected`, then an
//! (empty) offline sync.

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::transport::Transport;
use parley_types::conversation::ConversationId;
use parley_types::error::TransportError;
use parley_types::event::{InboundMessage, Presence, SentReceipt, TransportEvent};

/// Terminal transport. See the module docs for the line format.
pub struct ConsoleTransport {
    self_id: String,
    events: UnboundedSender<TransportEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleTransport {
    /// Create the transport and the receiving end of its event channel.
    pub fn new(self_id: impl Into<String>) -> (Self, UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            self_id: self_id.into(),
            events,
            reader: Mutex::new(None),
        };
        (transport, rx)
    }

    /// Start emitting events read from `input`. A second call is a no-op.
    pub async fn connect_with<R>(&self, input: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut reader = self.reader.lock().await;
        if reader.is_some() {
            debug!("console transport already connected");
            return;
        }
        *reader = Some(tokio::spawn(read_events(input, self.events.clone())));
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        match self.reader.lock().await.as_ref() {
            Some(_) => Ok(()),
            None => Err(TransportError::NotConnected),
        }
    }
}

/// Split `conversation: text`. An empty text yields a non-text message.
fn parse_line(line: &str) -> Option<(ConversationId, Option<String>)> {
    let (conversation, text) = line.split_once(':')?;
    let conversation = conversation.trim();
    if conversation.is_empty() {
        return None;
    }
    let text = text.trim();
    let text = (!text.is_empty()).then(|| text.to_string());
    Some((ConversationId::from(conversation), text))
}

async fn read_events<R>(input: R, events: UnboundedSender<TransportEvent>)
where
    R: AsyncBufRead + Unpin,
{
    for event in [
        TransportEvent::Connected,
        TransportEvent::OfflineSyncStarted,
        TransportEvent::OfflineSyncCompleted,
    ] {
        if events.send(event).is_err() {
            return;
        }
    }

    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "failed to read console input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some((conversation_id, text)) = parse_line(&line) else {
            warn!(line = %line, "expected `<conversation>: <text>`");
            continue;
        };
        let message = InboundMessage {
            id: Uuid::now_v7().to_string(),
            sender_id: conversation_id.to_string(),
            conversation_id,
            text,
            sent_at: Utc::now(),
        };
        if events.send(TransportEvent::Message(message)).is_err() {
            return;
        }
    }
    info!("console input closed");
}

impl Transport for ConsoleTransport {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_with(BufReader::new(tokio::io::stdin())).await;
        info!(self_id = %self.self_id, "console transport connected");
        Ok(())
    }

    async fn mark_read(
        &self,
        message_id: &str,
        conversation_id: &ConversationId,
        _sender_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        self.ensure_connected().await?;
        debug!(%conversation_id, message_id, "marked read");
        Ok(())
    }

    async fn send_presence(&self, presence: Presence) -> Result<(), TransportError> {
        self.ensure_connected().await?;
        debug!(%presence, "presence");
        Ok(())
    }

    async fn send_composing(&self, conversation_id: &ConversationId) -> Result<(), TransportError> {
        self.ensure_connected().await?;
        println!(
            "{}",
            console::style(format!("[{conversation_id}] {} is typing...", self.self_id)).dim()
        );
        Ok(())
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<SentReceipt, TransportError> {
        self.ensure_connected().await?;
        println!(
            "{} {}",
            console::style(format!("[{conversation_id}] {}:", self.self_id))
                .cyan()
                .bold(),
            text
        );
        Ok(SentReceipt {
            id: Uuid::now_v7().to_string(),
            sent_at: Utc::now(),
        })
    }

    async fn purge_credentials(&self) -> Result<(), TransportError> {
        info!("console transport keeps no credentials");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            info!("console transport disconnected");
        }
    }
}
