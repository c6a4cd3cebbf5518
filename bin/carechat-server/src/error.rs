//! Unified server error type.
//!
//! Every dispatcher branch returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a `{"error": "..."}`
//! JSON body with the matching status code.
//!
//! **Security note:** upstream and database failures are logged
//! server-side and answered with a fixed generic message. Message content is
//! never part of either the log line or the response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::services::completion::CompletionError;

/// Client-facing text returned for any 500.
pub const GENERIC_FAILURE: &str = "Failed to process chat request.";

/// Client-facing text returned when the model exhausted its time budget.
pub const TIMEOUT_HINT: &str = "The assistant took too long to respond. Please try again.";

/// All errors that can end a chat request.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing, invalid or expired credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Browser origin is not on the allowlist.
    #[error("origin not allowed")]
    OriginDisallowed,

    /// The caller sent an invalid or incomplete request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The model call ran out of time on every permitted attempt.
    #[error("model call timed out")]
    Timeout,

    /// Non-timeout failure from the model provider.
    #[error("upstream failure: {0}")]
    Upstream(CompletionError),

    /// Propagated from the durable store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CompletionError> for ServerError {
    fn from(e: CompletionError) -> Self {
        if e.is_timeout() {
            ServerError::Timeout
        } else {
            ServerError::Upstream(e)
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::OriginDisallowed => (StatusCode::FORBIDDEN, "Origin not allowed.".to_owned()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Timeout => {
                warn!("model call exhausted its time budget");
                (StatusCode::GATEWAY_TIMEOUT, TIMEOUT_HINT.to_owned())
            }

            // Internal errors: log the class, keep details private.
            ServerError::Upstream(e) => {
                error!(error = %e, "model provider failure");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_owned())
            }
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_owned())
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
