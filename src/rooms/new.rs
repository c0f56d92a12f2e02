use axum::{debug_handler, extract::State, http::StatusCode, Form, Json};
use serde::Deserialize;

use crate::{session::Principal, AppResult};

use super::RoomDirectory;

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomForm {
    chatroom_name: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(directory): State<RoomDirectory>,
    principal: Principal,
    Form(NewRoomForm { chatroom_name }): Form<NewRoomForm>,
) -> AppResult<(StatusCode, Json<String>)> {
    let name = directory.create_room(&chatroom_name, &principal).await?;
    Ok((StatusCode::CREATED, Json(name)))
}
