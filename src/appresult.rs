use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::{rooms::DirectoryError, session::Unauthenticated};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        if self.0.is::<Unauthenticated>() {
            return StatusCode::UNAUTHORIZED;
        }
        match self.0.downcast_ref::<DirectoryError>() {
            Some(DirectoryError::InvalidRoomName { .. }) => StatusCode::BAD_REQUEST,
            Some(DirectoryError::RoomNotFound(_) | DirectoryError::InviteNotFound(_)) => StatusCode::NOT_FOUND,
            Some(DirectoryError::NotMember { .. }) => StatusCode::FORBIDDEN,
            Some(DirectoryError::RoomExists(_)) => StatusCode::CONFLICT,
            Some(DirectoryError::InviteExpired(_)) => StatusCode::GONE,
            Some(DirectoryError::RoomBusy(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(AppError::from(Unauthenticated).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(DirectoryError::RoomNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(DirectoryError::RoomExists("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(DirectoryError::InvalidRoomName { name: "x".into(), reason: "short" }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(DirectoryError::NotMember { room: "x".into(), user_id: "y".into() }).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
