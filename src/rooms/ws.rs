use std::fmt::Display;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, Stream, StreamExt};

use crate::{connections::ConnectionHandle, session::Principal};

use super::{directory::DirectoryError, msg::ClientFrame, RoomDirectory};

/// Why an ingress pump stopped reading.
#[derive(Debug)]
pub enum PumpExit {
    Closed,
    Transport(String),
    Malformed(serde_json::Error),
    Rejected(DirectoryError),
}

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    State(directory): State<RoomDirectory>,
    principal: Principal,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, directory, principal))
}

async fn serve(socket: WebSocket, directory: RoomDirectory, principal: Principal) {
    let (mut sender, receiver) = socket.split();
    let (handle, mut rx) =
        ConnectionHandle::new(principal.user_id(), directory.settings().connection_buffer);
    let connection = handle.downgrade();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    match directory.connect(connection.clone()).await {
        Ok(rooms) => {
            tracing::info!(user_id = %principal.user_id(), connection = %handle.id(), rooms, "connection opened");
            match pump(receiver, &handle, &directory).await {
                PumpExit::Closed => {
                    tracing::info!(user_id = %principal.user_id(), "connection closed")
                }
                exit => {
                    tracing::warn!(user_id = %principal.user_id(), reason = ?exit, "connection dropped")
                }
            }
        }
        Err(e) => {
            tracing::error!(user_id = %principal.user_id(), error = %e, "could not attach connection to rooms")
        }
    }

    directory.disconnect(&connection);
    // last strong sender: the writer drains what is queued, then the socket closes
    drop(handle);
    if let Err(e) = writer.await {
        tracing::warn!(user_id = %principal.user_id(), error = %e, "socket writer task failed");
    }
}

/// Reads client frames until the socket ends or a frame is rejected,
/// forwarding each submission to its room. Posting to a room the user is
/// not a member of is a rejection.
pub async fn pump<S, E>(mut frames: S, handle: &ConnectionHandle, directory: &RoomDirectory) -> PumpExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = frames.next().await {
        let parsed = match frame {
            Ok(Message::Text(text)) => serde_json::from_str::<ClientFrame>(text.as_str()),
            Ok(Message::Binary(bytes)) => serde_json::from_slice::<ClientFrame>(&bytes),
            Ok(Message::Close(_)) => return PumpExit::Closed,
            Ok(_) => continue,
            Err(e) => return PumpExit::Transport(e.to_string()),
        };

        let ClientFrame { chatroom_name, message } = match parsed {
            Ok(frame) => frame,
            Err(e) => return PumpExit::Malformed(e),
        };

        if let Err(e) = directory.submit(&chatroom_name, handle.user_id(), message).await {
            return PumpExit::Rejected(e);
        }
    }
    PumpExit::Closed
}
