//! One task per room. The actor owns the room's processing order, its log
//! partition, and its attachment list; everything else talks to it through
//! a [`RoomHandle`].

use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, Utf8Bytes};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    connections::ConnectionRef,
    ids::{IdError, IdGenerator},
    message_log::{LogError, MessageLog},
};

use super::{
    directory::DirectoryError,
    msg::{IncomingMessage, OutgoingMessage, StoredMessage, TimestampError},
};

/// Longest wait between two append attempts.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PersistPolicy {
    /// Total append attempts, at least one.
    pub attempts: u32,
    /// Wait before the first retry; doubled for each one after, up to
    /// [`MAX_RETRY_BACKOFF`].
    pub backoff: Duration,
    /// Fan out a message whose append finally failed instead of dropping it.
    pub fanout_on_failure: bool,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
            fanout_on_failure: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub inbox_capacity: usize,
    pub connection_buffer: usize,
    pub persist: PersistPolicy,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            connection_buffer: 64,
            persist: PersistPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub enum RoomCommand {
    Deliver(IncomingMessage),
    Attach(ConnectionRef),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("could not allocate a message id: {0}")]
    Id(#[from] IdError),
    #[error("message {message_id} was not persisted: {source}")]
    Persist { message_id: u64, source: LogError },
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("could not encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What happened to one processed message.
#[derive(Debug)]
pub struct Fanout {
    pub message: StoredMessage,
    pub persisted: bool,
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    inbox: mpsc::Sender<RoomCommand>,
    cancel: CancellationToken,
}

impl RoomHandle {
    /// Queues a message, waiting for inbox capacity if the room is behind.
    pub async fn deliver(&self, message: IncomingMessage) -> Result<(), DirectoryError> {
        self.inbox
            .send(RoomCommand::Deliver(message))
            .await
            .map_err(|_| DirectoryError::RoomClosed(self.name.to_string()))
    }

    /// Queues a message only if the inbox has room right now.
    pub fn try_deliver(&self, message: IncomingMessage) -> Result<(), DirectoryError> {
        self.inbox
            .try_send(RoomCommand::Deliver(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DirectoryError::RoomBusy(self.name.to_string()),
                mpsc::error::TrySendError::Closed(_) => DirectoryError::RoomClosed(self.name.to_string()),
            })
    }

    pub async fn attach(&self, connection: ConnectionRef) -> Result<(), DirectoryError> {
        self.inbox
            .send(RoomCommand::Attach(connection))
            .await
            .map_err(|_| DirectoryError::RoomClosed(self.name.to_string()))
    }

    /// Asks the actor to stop once the message in hand is finished.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the actor has exited.
    pub async fn stopped(&self) {
        self.inbox.closed().await
    }
}

pub struct RoomActor {
    name: Arc<str>,
    inbox: mpsc::Receiver<RoomCommand>,
    attached: Vec<ConnectionRef>,
    ids: Arc<IdGenerator>,
    log: Arc<dyn MessageLog>,
    persist: PersistPolicy,
    cancel: CancellationToken,
}

impl RoomActor {
    pub fn new(
        name: &str,
        ids: Arc<IdGenerator>,
        log: Arc<dyn MessageLog>,
        settings: &RoomSettings,
        cancel: CancellationToken,
    ) -> (Self, RoomHandle) {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::channel(settings.inbox_capacity);

        let actor = Self {
            name: name.clone(),
            inbox: rx,
            attached: Vec::new(),
            ids,
            log,
            persist: settings.persist.clone(),
            cancel: cancel.clone(),
        };
        let handle = RoomHandle { name, inbox: tx, cancel };
        (actor, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub fn attached(&self) -> &[ConnectionRef] {
        &self.attached
    }

    async fn run(mut self) {
        tracing::debug!(room = %self.name, "room actor running");
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.inbox.recv() => command,
            };
            let Some(command) = command else {
                break;
            };

            match command {
                RoomCommand::Attach(connection) => self.attach(connection),
                RoomCommand::Deliver(incoming) => match self.process(incoming).await {
                    Ok(fanout) => tracing::debug!(
                        room = %self.name,
                        message_id = fanout.message.message_id,
                        attempted = fanout.attempted,
                        failed = fanout.failed,
                        "message fanned out"
                    ),
                    Err(e) => tracing::error!(room = %self.name, error = %e, "message dropped"),
                },
            }
        }
        tracing::info!(room = %self.name, "room actor stopped");
    }

    pub fn attach(&mut self, connection: ConnectionRef) {
        if self.attached.iter().any(|c| c.id() == connection.id()) {
            return;
        }
        tracing::debug!(room = %self.name, user_id = %connection.user_id(), "connection attached");
        self.attached.push(connection);
    }

    /// Assigns an id, persists, and writes the message to every attached
    /// connection. Persistence always completes (or gives up) before the
    /// first write.
    pub async fn process(&mut self, incoming: IncomingMessage) -> Result<Fanout, ProcessError> {
        let message_id = self.ids.next_id()?;
        let message = StoredMessage::new(incoming, message_id);

        let persisted = match self.append(&message).await {
            Ok(()) => true,
            Err(source) if !self.persist.fanout_on_failure => {
                return Err(ProcessError::Persist { message_id, source });
            }
            Err(e) => {
                tracing::error!(
                    room = %self.name,
                    message_id,
                    error = %e,
                    "message not persisted, fanning out anyway"
                );
                false
            }
        };

        let frame: Utf8Bytes = serde_json::to_string(&OutgoingMessage::from_stored(&message)?)?.into();

        let mut failed = 0;
        for connection in &self.attached {
            if let Err(e) = connection.send(Message::Text(frame.clone())) {
                failed += 1;
                tracing::warn!(
                    room = %self.name,
                    user_id = %connection.user_id(),
                    error = %e,
                    "could not write message to connection"
                );
            }
        }
        let attempted = self.attached.len();

        if failed > 0 {
            self.attached.retain(|c| !c.is_closed());
        }

        Ok(Fanout { message, persisted, attempted, failed })
    }

    async fn append(&self, message: &StoredMessage) -> Result<(), LogError> {
        let mut backoff = self.persist.backoff.min(MAX_RETRY_BACKOFF);
        let mut attempt = 1;
        loop {
            match self.log.append(message).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.persist.attempts => {
                    tracing::warn!(
                        room = %self.name,
                        message_id = message.message_id,
                        attempt,
                        error = %e,
                        "message log append failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_RETRY_BACKOFF)
}
