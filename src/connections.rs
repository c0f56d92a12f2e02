//! Live connections and the per-user registry.
//!
//! A [`ConnectionHandle`] is owned by the ingress pump that created it and is
//! the only strong sender into that socket's writer task. The registry and
//! every room hold [`ConnectionRef`]s, which stop working as soon as the pump
//! drops its handle.

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(Uuid),
    #[error("connection {0} outbound buffer is full")]
    Full(Uuid),
}

#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: Arc<str>,
    tx: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    /// Returns the handle and the receiving end for the socket writer.
    pub fn new(user_id: &str, buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Self {
            id: Uuid::now_v7(),
            user_id: Arc::from(user_id),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn downgrade(&self) -> ConnectionRef {
        ConnectionRef {
            id: self.id,
            user_id: self.user_id.clone(),
            tx: self.tx.downgrade(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRef {
    id: Uuid,
    user_id: Arc<str>,
    tx: mpsc::WeakSender<Message>,
}

impl ConnectionRef {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queues `message` for the socket without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        let tx = self.tx.upgrade().ok_or(SendError::Closed(self.id))?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full(self.id),
            TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.upgrade().is_none_or(|tx| tx.is_closed())
    }
}

/// One live connection per user. A reconnect replaces the previous entry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionRef>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connection this one superseded, if any.
    pub fn register(&self, connection: ConnectionRef) -> Option<ConnectionRef> {
        let previous = self
            .connections
            .insert(connection.user_id().to_owned(), connection);
        if let Some(previous) = &previous {
            tracing::debug!(user_id = %previous.user_id(), superseded = %previous.id(), "connection replaced");
        }
        previous
    }

    /// Removes the user's entry if it still points at `connection_id`.
    /// Rooms the connection is attached to are not touched.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(user_id, |_, current| current.id() == connection_id)
            .is_some()
    }

    pub fn get(&self, user_id: &str) -> Option<ConnectionRef> {
        self.connections.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refs_deliver_until_the_handle_is_dropped() {
        let (handle, mut rx) = ConnectionHandle::new("alice", 4);
        let conn = handle.downgrade();

        conn.send(Message::Text("one".into())).unwrap();
        assert_eq!(rx.recv().await, Some(Message::Text("one".into())));
        assert!(!conn.is_closed());

        drop(handle);
        assert!(conn.is_closed());
        assert_eq!(conn.send(Message::Text("two".into())), Err(SendError::Closed(conn.id())));
    }

    #[tokio::test]
    async fn dropped_writer_closes_the_connection() {
        let (handle, rx) = ConnectionHandle::new("alice", 4);
        let conn = handle.downgrade();
        drop(rx);

        assert!(conn.is_closed());
        assert_eq!(conn.send(Message::Text("hi".into())), Err(SendError::Closed(handle.id())));
    }

    #[tokio::test]
    async fn full_buffer_is_not_closed() {
        let (handle, _rx) = ConnectionHandle::new("alice", 1);
        let conn = handle.downgrade();

        conn.send(Message::Text("one".into())).unwrap();
        assert_eq!(conn.send(Message::Text("two".into())), Err(SendError::Full(handle.id())));
        assert!(!conn.is_closed());
    }

    #[test]
    fn reconnect_supersedes_and_stale_unregister_is_ignored() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = ConnectionHandle::new("alice", 1);
        let (second, _rx2) = ConnectionHandle::new("alice", 1);

        assert!(registry.register(first.downgrade()).is_none());
        let replaced = registry.register(second.downgrade()).unwrap();
        assert_eq!(replaced.id(), first.id());
        assert_eq!(registry.len(), 1);

        assert!(!registry.unregister("alice", first.id()));
        assert_eq!(registry.get("alice").unwrap().id(), second.id());

        assert!(registry.unregister("alice", second.id()));
        assert!(registry.get("alice").is_none());
        assert!(registry.is_empty());
    }
}
