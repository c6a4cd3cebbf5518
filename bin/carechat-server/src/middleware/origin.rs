//! Origin Policy: which browser origins may talk to `/chat`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN, VARY,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Url;
use tracing::warn;

use crate::error::ServerError;
use crate::state::AppState;

pub const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header: same-origin or non-browser caller, no CORS headers.
    NoOrigin,
    /// Echo this exact value in `Access-Control-Allow-Origin`.
    Allowed(String),
    Disallowed,
}

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    exact: HashSet<String>,
    wildcard: bool,
}

impl OriginPolicy {
    /// Parse a comma-separated allowlist. `*` allows any origin (echoed, never
    /// sent back literally).
    pub fn from_list(list: &str) -> Self {
        let mut policy = Self::default();
        for entry in list.split(',').map(normalize).filter(|e| !e.is_empty()) {
            if entry == "*" {
                policy.wildcard = true;
            } else {
                policy.exact.insert(entry.to_owned());
            }
        }
        policy
    }

    pub fn evaluate(&self, origin: Option<&str>) -> OriginDecision {
        let Some(raw) = origin else {
            return OriginDecision::NoOrigin;
        };
        let origin = normalize(raw);
        if origin.is_empty() {
            return OriginDecision::Disallowed;
        }
        // Loopback covers the "same port and scheme on another loopback name"
        // case as well, so no separate normalized comparison is needed.
        if is_loopback(origin) || self.exact.contains(origin) || (self.wildcard && is_http_origin(origin)) {
            OriginDecision::Allowed(origin.to_owned())
        } else {
            OriginDecision::Disallowed
        }
    }
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

fn is_http_origin(origin: &str) -> bool {
    Url::parse(origin).is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

fn is_loopback(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https")
        && matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]" | "::1"))
}

fn apply_cors(headers: &mut HeaderMap, origin: &str) {
    let Ok(value) = HeaderValue::from_str(origin) else {
        return;
    };
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

/// Reject disallowed origins, answer pre-flight, and decorate allowed
/// responses with CORS headers. Runs before authentication.
pub async fn origin_guard(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    // A non-UTF-8 Origin evaluates as empty, which is disallowed.
    let origin = req
        .headers()
        .get(ORIGIN)
        .map(|v| v.to_str().unwrap_or_default().to_owned());

    let allowed = match state.origins.evaluate(origin.as_deref()) {
        OriginDecision::Disallowed => {
            warn!(origin = origin.as_deref().unwrap_or_default(), "request from disallowed origin");
            return ServerError::OriginDisallowed.into_response();
        }
        OriginDecision::Allowed(origin) => Some(origin),
        OriginDecision::NoOrigin => None,
    };

    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    if let Some(origin) = allowed {
        apply_cors(response.headers_mut(), &origin);
    }
    response
}
