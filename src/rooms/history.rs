use axum::{debug_handler, extract::State, Form, Json};
use serde::Deserialize;

use crate::{session::Principal, AppResult};

use super::{msg::OutgoingMessage, RoomDirectory};

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesForm {
    #[serde(default)]
    chatroom_name: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    State(directory): State<RoomDirectory>,
    principal: Principal,
    Form(MessagesForm { chatroom_name }): Form<MessagesForm>,
) -> AppResult<Json<Vec<OutgoingMessage>>> {
    if chatroom_name.is_empty() {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(directory.history(&chatroom_name, &principal).await?))
}
