use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;

use crate::{session::Principal, store::InviteExpiry, AppResult};

use super::RoomDirectory;

#[derive(Debug, Deserialize)]
pub(crate) struct NewInviteForm {
    chatroom_name: String,
    invite_timelimit: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_invite(
    State(directory): State<RoomDirectory>,
    principal: Principal,
    Form(NewInviteForm { chatroom_name, invite_timelimit }): Form<NewInviteForm>,
) -> AppResult<Response> {
    let Some(expiry) = InviteExpiry::parse(&invite_timelimit) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            "Expiry value is not one of the possible choices",
        )
            .into_response());
    };

    let code = directory.create_invite(&chatroom_name, &principal, expiry).await?;
    Ok((StatusCode::CREATED, Json(code)).into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn join(
    State(directory): State<RoomDirectory>,
    principal: Principal,
    Path(code): Path<String>,
) -> AppResult<(StatusCode, Json<String>)> {
    let room = directory.join_room(&code, &principal).await?;
    Ok((StatusCode::ACCEPTED, Json(room)))
}
