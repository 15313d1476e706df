//! SQLite conversation store.
//!
//! Implements `ConversationStore` from `parley-core` using sqlx with split
//! read/write pools. Read-only transactions run on the reader pool, so
//! admission checks and history loads never queue behind the writer.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, Sqlite, Transaction};

use parley_core::store::{ConversationStore, StoreTransaction, TxOptions};
use parley_types::conversation::{Chat, ConversationId, StoredMessage};
use parley_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationStore`.
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: DatabasePool,
}

impl SqliteConversationStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Add a conversation to the allowlist. Allowing a known chat returns it unchanged.
    pub async fn allow_chat(&self, conversation_id: &ConversationId) -> Result<Chat, RepositoryError> {
        sqlx::query("INSERT INTO chats (id, created_at) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
            .bind(conversation_id.as_str())
            .bind(format_datetime(&Utc::now()))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query("SELECT id, created_at FROM chats WHERE id = ?")
            .bind(conversation_id.as_str())
            .fetch_one(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        chat_from_row(&row)
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>, RepositoryError> {
        let rows = sqlx::query("SELECT id, created_at FROM chats ORDER BY created_at, id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        rows.iter().map(chat_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    text: String,
    sent_at: String,
    recorded_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            text: row.try_get("text")?,
            sent_at: row.try_get("sent_at")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_message(self) -> Result<StoredMessage, RepositoryError> {
        Ok(StoredMessage {
            id: self.id,
            conversation_id: ConversationId::new(self.conversation_id),
            sender_id: self.sender_id,
            text: self.text,
            sent_at: parse_datetime(&self.sent_at)?,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

fn messages_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<StoredMessage>, RepositoryError> {
    rows.iter()
        .map(|row| {
            MessageRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_message()
        })
        .collect()
}

fn chat_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chat, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    Ok(Chat {
        id: ConversationId::new(id),
        created_at: parse_datetime(&created_at)?,
    })
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 (microseconds, `Z`), so string order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// ConversationStore implementation
// ---------------------------------------------------------------------------

/// An open SQLite transaction. Dropping it without commit rolls back.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    read_only: bool,
}

impl ConversationStore for SqliteConversationStore {
    type Tx = SqliteTransaction;

    // SQLite transactions are serializable, so the isolation option needs no
    // per-level handling; only the pool choice depends on `read_only`.
    async fn begin(&self, options: TxOptions) -> Result<SqliteTransaction, RepositoryError> {
        let pool = if options.read_only {
            &self.pool.reader
        } else {
            &self.pool.writer
        };
        let tx = pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(SqliteTransaction {
            tx,
            read_only: options.read_only,
        })
    }
}

impl StoreTransaction for SqliteTransaction {
    async fn chat_exists(&mut self, conversation_id: &ConversationId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM chats WHERE id = ?")
            .bind(conversation_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn append_message(&mut self, message: &StoredMessage) -> Result<(), RepositoryError> {
        if self.read_only {
            return Err(RepositoryError::ReadOnly);
        }
        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, sender_id, text, sent_at, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(&message.id)
        .bind(message.conversation_id.as_str())
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(format_datetime(&message.sent_at))
        .bind(format_datetime(&message.recorded_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn messages_for_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, conversation_id, sender_id, text, sent_at, recorded_at
               FROM messages
               WHERE conversation_id = ?
               ORDER BY sent_at, seq"#,
        )
        .bind(conversation_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        messages_from_rows(&rows)
    }

    async fn all_messages_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, conversation_id, sender_id, text, sent_at, recorded_at
               FROM messages
               WHERE recorded_at >= ?
               ORDER BY recorded_at, seq"#,
        )
        .bind(format_datetime(&since))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        messages_from_rows(&rows)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx
            .commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }
}
