//! Append-only per-room message log.
//!
//! Partitioned by room name and clustered by message id, newest first. The
//! room actor is the only writer of its partition.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::rooms::msg::StoredMessage;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("message log query failed: {0}")]
    Db(#[from] sqlx::Error),
    #[error("message id {0} does not fit the log's key column")]
    IdOutOfRange(u64),
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, message: &StoredMessage) -> Result<(), LogError>;

    /// Every message of `room`, most recent first.
    async fn scan(&self, room: &str) -> Result<Vec<StoredMessage>, LogError>;
}

#[derive(Clone)]
pub struct SqliteLog {
    db_pool: SqlitePool,
}

impl SqliteLog {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl MessageLog for SqliteLog {
    async fn append(&self, message: &StoredMessage) -> Result<(), LogError> {
        let message_id =
            i64::try_from(message.message_id).map_err(|_| LogError::IdOutOfRange(message.message_id))?;

        sqlx::query("INSERT INTO messages (chatroom_name,user_id,content,message_id) VALUES (?,?,?,?)")
            .bind(&message.room)
            .bind(&message.user_id)
            .bind(&message.content)
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }

    async fn scan(&self, room: &str) -> Result<Vec<StoredMessage>, LogError> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT chatroom_name,user_id,content,message_id FROM messages WHERE chatroom_name=? ORDER BY message_id DESC",
        )
        .bind(room)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(room, user_id, content, message_id)| StoredMessage {
                room,
                user_id,
                content,
                // only non-negative ids are ever appended
                message_id: message_id as u64,
            })
            .collect())
    }
}
