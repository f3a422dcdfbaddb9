//! HTTP error mapping.
//!
//! Every failure surfaces as `{"error": {"code": "...", "message": "..."}}`
//! with a stable status code. Store sentinel kinds map one-to-one; anything
//! unexpected is a 500 with the details kept server-side.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::domains::runs::RunStoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("lease token does not match any attempt for this run")]
    InvalidLeaseToken,

    #[error("attempt is no longer active")]
    AttemptNotActive,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::InvalidLeaseToken => (StatusCode::GONE, "invalid_lease_token"),
            ApiError::AttemptNotActive => (StatusCode::GONE, "attempt_not_active"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl From<RunStoreError> for ApiError {
    fn from(err: RunStoreError) -> Self {
        match err {
            RunStoreError::NotFound => ApiError::NotFound("run not found".to_string()),
            // Routes turn this into 204 before conversion; mapped defensively.
            RunStoreError::NoRunAvailable => ApiError::NotFound("no run available".to_string()),
            RunStoreError::InvalidLeaseToken => ApiError::InvalidLeaseToken,
            RunStoreError::AttemptNotActive => ApiError::AttemptNotActive,
            RunStoreError::LeaseConflict(msg) => ApiError::Conflict(msg),
            RunStoreError::Database(e) => ApiError::Internal(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internals are logged, not leaked.
        let message = if let ApiError::Internal(ref e) = self {
            error!(error = %e, "internal server error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
