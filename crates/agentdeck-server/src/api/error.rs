// ABOUTME: JSON error responses for the API: every failure renders as {"error": "<message>"}.
// ABOUTME: Maps controller errors onto HTTP status codes.

use agentdeck_agent::HitlError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An error returned by a handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<HitlError> for ApiError {
    fn from(err: HitlError) -> Self {
        let status = match &err {
            HitlError::EntityNotFound { .. } | HitlError::RunNotFound(_) => StatusCode::NOT_FOUND,
            HitlError::RunNotPending { .. } | HitlError::EntityMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            HitlError::AlreadyResumed(_) => StatusCode::CONFLICT,
            HitlError::UnserializableState(_) | HitlError::Engine(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            HitlError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_core::{EntityKind, RunStatus};
    use ulid::Ulid;

    #[test]
    fn controller_errors_map_to_statuses() {
        let cases = [
            (
                HitlError::EntityNotFound {
                    kind: EntityKind::Agent,
                    id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (HitlError::RunNotFound(Ulid::new()), StatusCode::NOT_FOUND),
            (
                HitlError::RunNotPending {
                    run_id: Ulid::new(),
                    status: RunStatus::Completed,
                },
                StatusCode::BAD_REQUEST,
            ),
            (HitlError::AlreadyResumed(Ulid::new()), StatusCode::CONFLICT),
            (
                HitlError::UnserializableState("socket".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                HitlError::StorageUnavailable("disk".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
