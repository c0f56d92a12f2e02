pub mod actor;
pub mod directory;
pub mod msg;
pub mod ws;

mod history;
mod invite;
mod new;

use axum::{routing::post, Router};

use crate::AppState;

pub use actor::{PersistPolicy, RoomHandle, RoomSettings};
pub use directory::{DirectoryError, RoomDirectory, UserRooms};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(new::new_room))
        .route("/invite", post(invite::new_invite))
        .route("/join/{code}", post(invite::join))
        .route("/messages", post(history::messages))
}
