use axum::{debug_handler, extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::{rooms::RoomDirectory, session::Principal, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/chatrooms", post(chatrooms))
}

#[derive(Debug, Serialize)]
pub(crate) struct UserInfo {
    name: String,
    chatrooms: Vec<String>,
    current_room: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn chatrooms(
    State(directory): State<RoomDirectory>,
    principal: Principal,
) -> AppResult<Json<UserInfo>> {
    let rooms = directory.user_rooms(&principal).await?;
    Ok(Json(UserInfo {
        name: principal.user_id().to_owned(),
        chatrooms: rooms.rooms,
        current_room: rooms.current,
    }))
}
