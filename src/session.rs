//! Who is calling. Authentication proper lives outside this service; the
//! session only carries the user id it settled on.

use axum::{
    debug_handler,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppError, AppResult, AppState};

pub const USER_ID: &str = "user_id";

const USER_ID_MAX: usize = 30;

#[derive(Debug, thiserror::Error)]
#[error("not logged in")]
pub struct Unauthenticated;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::from(anyhow::Error::msg(msg)))?;

        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(Unauthenticated.into());
        };
        Ok(Principal { user_id })
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    user_id: String,
}

/// Stand-in for the credential check: trusts the submitted user id.
#[debug_handler]
pub(crate) async fn login(
    session: Session,
    Form(LoginForm { user_id }): Form<LoginForm>,
) -> AppResult<Response> {
    let user_id = user_id.trim();
    if user_id.is_empty() || user_id.len() > USER_ID_MAX {
        return Ok((StatusCode::BAD_REQUEST, "user id must be 1 to 30 characters").into_response());
    }

    session.cycle_id().await?;
    session.insert(USER_ID, user_id).await?;
    tracing::info!(user_id = %user_id, "logged in");

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[debug_handler]
pub(crate) async fn logout(session: Session) -> AppResult<StatusCode> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}
