use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::ids;

/// Client -> server frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientFrame {
    pub chatroom_name: String,
    pub message: String,
}

/// A submission accepted from one connection, waiting in a room's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub room: String,
    pub user_id: String,
    pub content: String,
}

/// One row of the message log. Never changes after it is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub room: String,
    pub user_id: String,
    pub content: String,
    pub message_id: u64,
}

/// Server -> client frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutgoingMessage {
    pub chatroom_name: String,
    pub user_id: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("message time out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
    #[error("could not format message time: {0}")]
    Format(#[from] time::error::Format),
}

impl StoredMessage {
    pub fn new(incoming: IncomingMessage, message_id: u64) -> Self {
        let IncomingMessage { room, user_id, content } = incoming;
        Self { room, user_id, content, message_id }
    }
}

impl OutgoingMessage {
    pub fn from_stored(message: &StoredMessage) -> Result<Self, TimestampError> {
        Ok(Self {
            chatroom_name: message.room.clone(),
            user_id: message.user_id.clone(),
            content: message.content.clone(),
            timestamp: timestamp(message.message_id)?,
        })
    }
}

/// RFC3339 time embedded in a message id, to the second.
pub fn timestamp(message_id: u64) -> Result<String, TimestampError> {
    let seconds = ids::decompose(message_id).unix_seconds();
    Ok(OffsetDateTime::from_unix_timestamp(seconds)?.format(&Rfc3339)?)
}
