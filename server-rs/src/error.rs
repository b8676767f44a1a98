use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::moderation::ModerationError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Storage(other),
        }
    }
}

impl From<ModerationError> for AppError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            ModerationError::InvalidState(msg) => AppError::BadRequest(msg),
            ModerationError::StorageFailure(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, retryable) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), false),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), false),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), false),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), false),
            AppError::Conflict(msg) => {
                tracing::warn!("Write conflict: {msg}");
                (
                    StatusCode::CONFLICT,
                    "Concurrent update, retry the request".to_string(),
                    true,
                )
            }
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
                true,
            ),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable".to_string(),
                    true,
                )
            }
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string(), false),
        };

        let body = if retryable {
            json!({ "error": message, "retryable": true })
        } else {
            json!({ "error": message })
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_errors_map_to_status_codes() {
        let cases = [
            (ModerationError::NotFound("review 'x'".into()), StatusCode::NOT_FOUND),
            (ModerationError::InvalidState("bad".into()), StatusCode::BAD_REQUEST),
            (
                ModerationError::StorageFailure(StoreError::Conflict("l1".into())),
                StatusCode::CONFLICT,
            ),
            (
                ModerationError::StorageFailure(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
