//! Relational side of the directory: which rooms exist, who belongs to
//! them, and outstanding invites.

use async_trait::async_trait;
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("directory store query failed: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt directory row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteExpiry {
    Day,
    Week,
    Forever,
}

impl InviteExpiry {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1 day" => Some(Self::Day),
            "1 week" => Some(Self::Week),
            "Forever" => Some(Self::Forever),
            _ => None,
        }
    }

    pub fn expires_at(self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            Self::Day => Some(now + Duration::days(1)),
            Self::Week => Some(now + Duration::weeks(1)),
            Self::Forever => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub code: String,
    pub room: String,
    /// `None` never expires.
    pub expires: Option<OffsetDateTime>,
}

impl Invite {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires < now)
    }
}

/// Rooms, memberships and invites as seen by the directory.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Every stored room, oldest first.
    async fn room_names(&self) -> Result<Vec<String>, StoreError>;

    /// Returns false if a room with that name was already stored.
    async fn insert_room(&self, name: &str) -> Result<bool, StoreError>;

    /// Records `user_id` as a member of `room` and makes it their current room.
    async fn add_membership(&self, user_id: &str, room: &str) -> Result<(), StoreError>;

    async fn is_member(&self, user_id: &str, room: &str) -> Result<bool, StoreError>;

    async fn memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn current_room(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn insert_invite(&self, invite: &Invite) -> Result<(), StoreError>;

    async fn find_invite(&self, code: &str) -> Result<Option<Invite>, StoreError>;

    /// Removes invites that expired before `now`, returning how many.
    async fn delete_expired_invites(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn room_names(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM rooms ORDER BY id")
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn insert_room(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO rooms (name) VALUES (?)")
            .bind(name)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_membership(&self, user_id: &str, room: &str) -> Result<(), StoreError> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO memberships (user_id,chatroom) VALUES (?,?)")
            .bind(user_id)
            .bind(room)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO current_rooms (user_id,chatroom) VALUES (?,?)
             ON CONFLICT(user_id) DO UPDATE SET chatroom=excluded.chatroom",
        )
        .bind(user_id)
        .bind(room)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn is_member(&self, user_id: &str, room: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM memberships WHERE user_id=? AND chatroom=?")
                .bind(user_id)
                .bind(room)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.is_some())
    }

    async fn memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT chatroom FROM memberships WHERE user_id=? ORDER BY chatroom")
                .bind(user_id)
                .fetch_all(&self.db_pool)
                .await?;
        Ok(rows.into_iter().map(|(room,)| room).collect())
    }

    async fn current_room(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT chatroom FROM current_rooms WHERE user_id=?")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(|(room,)| room))
    }

    async fn insert_invite(&self, invite: &Invite) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO invites (invite,chatroom,expires) VALUES (?,?,?)")
            .bind(&invite.code)
            .bind(&invite.room)
            .bind(invite.expires.map(OffsetDateTime::unix_timestamp))
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn find_invite(&self, code: &str) -> Result<Option<Invite>, StoreError> {
        let row: Option<(String, String, Option<i64>)> =
            sqlx::query_as("SELECT invite,chatroom,expires FROM invites WHERE invite=?")
                .bind(code)
                .fetch_optional(&self.db_pool)
                .await?;

        let Some((code, room, expires)) = row else {
            return Ok(None);
        };
        let expires = match expires {
            Some(seconds) => Some(
                OffsetDateTime::from_unix_timestamp(seconds)
                    .map_err(|e| StoreError::Corrupt(format!("invite {code} expiry: {e}")))?,
            ),
            None => None,
        };

        Ok(Some(Invite { code, room, expires }))
    }

    async fn delete_expired_invites(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM invites WHERE expires IS NOT NULL AND expires < ?")
            .bind(now.unix_timestamp())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}
