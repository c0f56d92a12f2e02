pub mod appresult;
pub mod config;
pub mod connections;
pub mod db;
pub mod ids;
pub mod message_log;
pub mod rooms;
pub mod session;
pub mod store;
pub mod users;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};
use rooms::RoomDirectory;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub directory: RoomDirectory,
}

pub fn app(state: AppState, session_inactivity: time::Duration) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(session_inactivity));

    let api = Router::new()
        .merge(session::router())
        .route("/ws", get(rooms::ws::room_ws))
        .nest("/room", rooms::router())
        .nest("/user", users::router());

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}
