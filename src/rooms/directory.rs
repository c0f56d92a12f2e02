use std::{sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use rand::{distr::Alphanumeric, Rng};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    connections::{ConnectionRef, ConnectionRegistry},
    ids::IdGenerator,
    message_log::{LogError, MessageLog},
    session::Principal,
    store::{Invite, InviteExpiry, RoomStore, StoreError},
};

use super::{
    actor::{RoomActor, RoomHandle, RoomSettings},
    msg::{IncomingMessage, OutgoingMessage, TimestampError},
};

pub const ROOM_NAME_MIN: usize = 4;
pub const ROOM_NAME_MAX: usize = 29;
const INVITE_CODE_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid room name {name:?}: {reason}")]
    InvalidRoomName { name: String, reason: &'static str },
    #[error("room {0:?} already exists")]
    RoomExists(String),
    #[error("room {0:?} not found")]
    RoomNotFound(String),
    #[error("room {0:?} is no longer running")]
    RoomClosed(String),
    #[error("{user_id:?} is not a member of room {room:?}")]
    NotMember { room: String, user_id: String },
    #[error("room {0:?} is busy")]
    RoomBusy(String),
    #[error("invite {0:?} not found")]
    InviteNotFound(String),
    #[error("invite {0:?} has expired")]
    InviteExpired(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

pub fn validate_room_name(name: &str) -> Result<(), DirectoryError> {
    let invalid = |reason| {
        Err(DirectoryError::InvalidRoomName {
            name: name.to_owned(),
            reason,
        })
    };

    if !(ROOM_NAME_MIN..=ROOM_NAME_MAX).contains(&name.len()) {
        return invalid("must be 4 to 29 characters long");
    }
    if !name.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return invalid("only printable ASCII characters and spaces are allowed");
    }
    if name.trim() != name {
        return invalid("must not start or end with a space");
    }
    Ok(())
}

/// Rooms the user belongs to, and the one they were last in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRooms {
    pub rooms: Vec<String>,
    pub current: Option<String>,
}

/// Process-wide map from room name to its running actor.
#[derive(Clone)]
pub struct RoomDirectory {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: DashMap<String, RoomHandle>,
    ids: Arc<IdGenerator>,
    log: Arc<dyn MessageLog>,
    store: Arc<dyn RoomStore>,
    connections: ConnectionRegistry,
    settings: RoomSettings,
    shutdown: CancellationToken,
}

impl RoomDirectory {
    pub fn new(
        ids: Arc<IdGenerator>,
        log: Arc<dyn MessageLog>,
        store: Arc<dyn RoomStore>,
        connections: ConnectionRegistry,
        settings: RoomSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                ids,
                log,
                store,
                connections,
                settings,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.inner.settings
    }

    pub fn room_names(&self) -> Vec<String> {
        self.inner.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Starts an actor for every persisted room. Must finish before any
    /// connection is accepted.
    pub async fn bootstrap(&self) -> Result<usize, DirectoryError> {
        let names = self.inner.store.room_names().await?;
        let mut started = 0;
        for name in names {
            if let Entry::Vacant(slot) = self.inner.rooms.entry(name) {
                let handle = self.start(slot.key());
                slot.insert(handle);
                started += 1;
            }
        }
        tracing::info!(rooms = started, "rooms rehydrated");
        Ok(started)
    }

    fn start(&self, name: &str) -> RoomHandle {
        let (actor, handle) = RoomActor::new(
            name,
            self.inner.ids.clone(),
            self.inner.log.clone(),
            &self.inner.settings,
            self.inner.shutdown.child_token(),
        );
        actor.spawn();
        handle
    }

    /// Persists the room, starts its actor, then records the creator as a
    /// member and attaches their live connection. The two writes are not
    /// atomic: if the membership write fails the room still exists.
    pub async fn create_room(&self, name: &str, creator: &Principal) -> Result<String, DirectoryError> {
        validate_room_name(name)?;
        if self.inner.rooms.contains_key(name) {
            return Err(DirectoryError::RoomExists(name.to_owned()));
        }

        if !self.inner.store.insert_room(name).await? {
            return Err(DirectoryError::RoomExists(name.to_owned()));
        }
        let handle = match self.inner.rooms.entry(name.to_owned()) {
            Entry::Occupied(_) => return Err(DirectoryError::RoomExists(name.to_owned())),
            Entry::Vacant(slot) => slot.insert(self.start(name)).clone(),
        };
        tracing::info!(room = %name, user_id = %creator.user_id(), "room created");

        self.inner.store.add_membership(creator.user_id(), name).await?;
        if let Some(connection) = self.inner.connections.get(creator.user_id()) {
            handle.attach(connection).await?;
        }
        Ok(name.to_owned())
    }

    pub async fn create_invite(
        &self,
        room: &str,
        inviter: &Principal,
        expiry: InviteExpiry,
    ) -> Result<String, DirectoryError> {
        self.ensure_member(room, inviter.user_id()).await?;
        let invite = Invite {
            code: invite_code(),
            room: room.to_owned(),
            expires: expiry.expires_at(OffsetDateTime::now_utc()),
        };
        self.inner.store.insert_invite(&invite).await?;
        tracing::info!(room = %room, user_id = %inviter.user_id(), ?expiry, "invite created");
        Ok(invite.code)
    }

    /// Resolves `code`, records `user` as a member, and attaches their live
    /// connection to the room.
    pub async fn join_room(&self, code: &str, user: &Principal) -> Result<String, DirectoryError> {
        let invite = self
            .inner
            .store
            .find_invite(code)
            .await?
            .ok_or_else(|| DirectoryError::InviteNotFound(code.to_owned()))?;
        if invite.is_expired(OffsetDateTime::now_utc()) {
            return Err(DirectoryError::InviteExpired(code.to_owned()));
        }

        let handle = self.lookup(&invite.room)?;
        self.inner.store.add_membership(user.user_id(), &invite.room).await?;
        if let Some(connection) = self.inner.connections.get(user.user_id()) {
            handle.attach(connection).await?;
        }
        tracing::info!(room = %invite.room, user_id = %user.user_id(), "room joined");
        Ok(invite.room)
    }

    /// Never blocks: unknown rooms are an immediate error.
    pub fn lookup(&self, room: &str) -> Result<RoomHandle, DirectoryError> {
        self.inner
            .rooms
            .get(room)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DirectoryError::RoomNotFound(room.to_owned()))
    }

    pub async fn deliver(&self, room: &str, user_id: &str, content: String) -> Result<(), DirectoryError> {
        let handle = self.lookup(room)?;
        handle
            .deliver(IncomingMessage {
                room: room.to_owned(),
                user_id: user_id.to_owned(),
                content,
            })
            .await
    }

    /// Resolves `room` and checks that `user_id` belongs to it.
    pub async fn ensure_member(&self, room: &str, user_id: &str) -> Result<RoomHandle, DirectoryError> {
        let handle = self.lookup(room)?;
        if !self.inner.store.is_member(user_id, room).await? {
            return Err(DirectoryError::NotMember {
                room: room.to_owned(),
                user_id: user_id.to_owned(),
            });
        }
        Ok(handle)
    }

    /// Delivery on behalf of a client: only members may post to a room.
    pub async fn submit(&self, room: &str, user_id: &str, content: String) -> Result<(), DirectoryError> {
        self.ensure_member(room, user_id)
            .await?
            .deliver(IncomingMessage {
                room: room.to_owned(),
                user_id: user_id.to_owned(),
                content,
            })
            .await
    }

    pub async fn attach(&self, room: &str, connection: ConnectionRef) -> Result<(), DirectoryError> {
        self.lookup(room)?.attach(connection).await
    }

    /// Registers a fresh connection and attaches it to every room its user
    /// is a member of. Returns how many rooms it was attached to.
    pub async fn connect(&self, connection: ConnectionRef) -> Result<usize, DirectoryError> {
        self.inner.connections.register(connection.clone());

        let mut attached = 0;
        for room in self.inner.store.memberships(connection.user_id()).await? {
            match self.attach(&room, connection.clone()).await {
                Ok(()) => attached += 1,
                Err(e) => tracing::warn!(room = %room, user_id = %connection.user_id(), error = %e, "membership not attached"),
            }
        }
        Ok(attached)
    }

    pub fn disconnect(&self, connection: &ConnectionRef) {
        self.inner
            .connections
            .unregister(connection.user_id(), connection.id());
    }

    /// Room history, most recent first. Only members may read it.
    pub async fn history(&self, room: &str, reader: &Principal) -> Result<Vec<OutgoingMessage>, DirectoryError> {
        self.ensure_member(room, reader.user_id()).await?;
        let messages = self.inner.log.scan(room).await?;
        Ok(messages
            .iter()
            .map(OutgoingMessage::from_stored)
            .collect::<Result<_, _>>()?)
    }

    pub async fn user_rooms(&self, user: &Principal) -> Result<UserRooms, DirectoryError> {
        Ok(UserRooms {
            rooms: self.inner.store.memberships(user.user_id()).await?,
            current: self.inner.store.current_room(user.user_id()).await?,
        })
    }

    pub fn spawn_invite_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.inner.store.clone();
        let cancel = self.inner.shutdown.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match store.delete_expired_invites(OffsetDateTime::now_utc()).await {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!(removed, "expired invites removed"),
                        Err(e) => tracing::warn!(error = %e, "could not remove expired invites"),
                    },
                }
            }
        })
    }

    /// Stops every room actor and background task started by this directory.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

fn invite_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect()
}
