use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::auth::AuthError;
use crate::error::ServerError;
use crate::state::AppState;

pub const MISSING_TOKEN: &str = "Missing Authorization token.";
pub const INVALID_TOKEN: &str = "Invalid user token.";

// Owned so no borrow of the (non-Sync) request body is held across the verify await.
fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

/// Verify the bearer token and attach the resulting [`crate::auth::Caller`]
/// as a request extension.
pub async fn require_caller(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&req) else {
        return ServerError::Unauthenticated(MISSING_TOKEN.into()).into_response();
    };

    match state.gate.verify(&token).await {
        Ok(caller) => {
            debug!(owner_id = %caller.owner_id, "caller verified");
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => {
            match &e {
                AuthError::KeySet(_) => warn!(error = %e, "identity key set unavailable"),
                _ => debug!(error = %e, "token rejected"),
            }
            ServerError::Unauthenticated(INVALID_TOKEN.into()).into_response()
        }
    }
}
