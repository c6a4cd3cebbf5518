//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/chat` behind the origin guard (outer) and caller authentication (inner)
//! - `/health`, outside both guards
//! - optional Swagger UI / OpenAPI document (`CARECHAT_ENABLE_SWAGGER`)
//! - response hardening headers and the per-request trace span on everything

pub mod chat;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue};
use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{origin_guard, require_caller, trace_middleware};
use crate::state::AppState;

/// Upper bound on a `/chat` request body; inline images make these large.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    // Layers added later wrap earlier ones, so the origin guard runs first.
    let chat = chat::router()
        .layer(middleware::from_fn_with_state(state.clone(), require_caller))
        .layer(middleware::from_fn_with_state(state.clone(), origin_guard))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    let mut app = Router::new().merge(health::router()).merge(chat);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    let hardening = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ));

    app.layer(hardening)
        .layer(middleware::from_fn(trace_middleware))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use carechat_types::{ChatMessage, ContentPart, ModelTurn};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use tracing_test::traced_test;

    use super::*;
    use crate::auth::{AuthError, Caller, TokenVerifier};
    use crate::cache::memory::MemoryBackend;
    use crate::cache::{CacheHealth, SessionCache, TurnCipher};
    use crate::config::test_config;
    use crate::entities::{MessageQuery, MessageStore, SqliteStore};
    use crate::error::TIMEOUT_HINT;
    use crate::middleware::OriginPolicy;
    use crate::services::completion::test::{Script, ScriptedTransport};
    use crate::services::completion::ModelCaller;

    const TOKEN: &str = "good-token";

    /// Accepts one fixed token and counts every verification attempt.
    #[derive(Default)]
    struct CountingVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenVerifier for CountingVerifier {
        async fn verify(&self, token: &str) -> Result<Caller, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == TOKEN {
                Ok(Caller { owner_id: "alice".into() })
            } else {
                Err(AuthError::MissingSubject)
            }
        }
    }

    struct Harness {
        app: Router,
        verifier: Arc<CountingVerifier>,
        transport: Arc<ScriptedTransport>,
        store: Arc<SqliteStore>,
        backend: Arc<MemoryBackend>,
    }

    async fn harness_with(transport: ScriptedTransport) -> Harness {
        let mut config = test_config();
        config.model.primary_timeout = std::time::Duration::from_millis(50);
        config.model.fallback_timeout = std::time::Duration::from_millis(50);

        let verifier = Arc::new(CountingVerifier::default());
        let transport = Arc::new(transport);
        let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let backend = Arc::new(MemoryBackend::default());
        let cache = SessionCache::new(
            Some(backend.clone()),
            Some(TurnCipher::new(config.cache.usable_key().unwrap())),
            Arc::new(CacheHealth::default()),
            config.cache.message_limit,
            config.cache.ttl_seconds,
        );
        let state = Arc::new(AppState {
            origins: Arc::new(OriginPolicy::from_list(&config.cors_allowed_origins)),
            model: Arc::new(ModelCaller::new(transport.clone(), &config.model)),
            cache: Arc::new(cache),
            gate: verifier.clone(),
            store: store.clone(),
            config: Arc::new(config),
        });
        Harness { app: build(state), verifier, transport, store, backend }
    }

    async fn harness() -> Harness {
        harness_with(ScriptedTransport::default().with("primary", Script::Reply("Rest and hydrate."))).await
    }

    fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    fn authed(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = request(method, uri).header("authorization", format!("Bearer {TOKEN}"));
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(h: &Harness, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let resp = h.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, headers, body)
    }

    fn is_minted_id(id: &str) -> bool {
        let Some(rest) = id.strip_prefix("conv_") else {
            return false;
        };
        let Some((millis, suffix)) = rest.split_once('_') else {
            return false;
        };
        !millis.is_empty()
            && millis.chars().all(|c| c.is_ascii_digit())
            && suffix.len() == 6
            && suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    }

    #[tokio::test]
    async fn first_message_mints_a_conversation_id() {
        let h = harness().await;
        let (status, _, body) = call(
            &h,
            authed(Method::POST, "/chat", Some(json!({ "messages": [{ "role": "user", "content": "Hello" }] }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Rest and hydrate.");
        let id = body["conversationId"].as_str().unwrap();
        assert!(is_minted_id(id), "{id}");

        let stored = h.store.query_messages("alice", MessageQuery::conversation(id)).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(h.backend.raw(&format!("chat:alice:{id}")).len(), 2);
    }

    #[tokio::test]
    async fn empty_history_lists_no_conversations() {
        let h = harness().await;
        let (status, _, body) = call(&h, authed(Method::GET, "/chat", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "conversations": [] }));
    }

    #[tokio::test]
    async fn deleting_unknown_conversation_reports_zero() {
        let h = harness().await;
        let (status, _, body) = call(&h, authed(Method::DELETE, "/chat?conversationId=does-not-exist", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deleted": 0, "conversationId": "does-not-exist" }));
    }

    #[tokio::test]
    async fn missing_authorization_is_rejected_for_every_method() {
        let h = harness().await;
        for method in [Method::GET, Method::POST, Method::DELETE] {
            let req = request(method.clone(), "/chat").body(Body::empty()).unwrap();
            let (status, _, body) = call(&h, req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method}");
            assert_eq!(body, json!({ "error": "Missing Authorization token." }));
        }
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_token_is_rejected() {
        let h = harness().await;
        let req = request(Method::GET, "/chat")
            .header("authorization", "Bearer forged")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&h, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Invalid user token." }));
    }

    #[tokio::test]
    async fn disallowed_origin_is_rejected_before_authentication() {
        let h = harness().await;
        let req = request(Method::GET, "/chat")
            .header("origin", "https://evil.example")
            .header("authorization", format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&h, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.get("access-control-allow-origin").is_none());
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preflight_needs_no_token() {
        let h = harness().await;
        let req = request(Method::OPTIONS, "/chat")
            .header("origin", "https://app.example")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&h, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers["access-control-allow-origin"], "https://app.example");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_origin_gets_cors_and_hardening_headers() {
        let h = harness().await;
        let mut req = authed(Method::GET, "/chat", None);
        req.headers_mut().insert("origin", HeaderValue::from_static("http://localhost:5173"));
        let (status, headers, _) = call(&h, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["access-control-allow-origin"], "http://localhost:5173");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["referrer-policy"], "same-origin");
        assert_eq!(headers["cache-control"], "no-store");
        assert!(headers.contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn malformed_send_requests_are_bad_requests() {
        let h = harness().await;
        let (status, _, body) = call(&h, authed(Method::POST, "/chat", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing request body.");

        let (status, _, body) = call(&h, authed(Method::POST, "/chat", Some(json!({ "messages": [] })))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Request must include messages.");

        let long_id = "x".repeat(200);
        let (status, _, _) = call(
            &h,
            authed(
                Method::POST,
                "/chat",
                Some(json!({ "conversationId": long_id, "messages": [{ "role": "user", "content": "hi" }] })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_conversation_id() {
        let h = harness().await;
        let (status, _, body) = call(&h, authed(Method::DELETE, "/chat", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing conversationId.");
    }

    #[tokio::test]
    async fn conversation_round_trip() {
        let h = harness().await;
        let send = json!({ "conversationId": "c-1", "messages": [{ "role": "user", "content": "I feel dizzy" }] });
        let (status, _, body) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversationId"], "c-1");

        let (_, _, body) = call(&h, authed(Method::GET, "/chat?conversationId=c-1", None)).await;
        assert_eq!(body["conversationId"], "c-1");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"], "Rest and hydrate.");

        let (_, _, body) = call(&h, authed(Method::GET, "/chat?conversationId=c-1&limit=1", None)).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "assistant");

        let (_, _, body) = call(&h, authed(Method::GET, "/chat", None)).await;
        let conversations = body["conversations"].as_array().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0]["conversationId"], "c-1");
        assert_eq!(conversations[0]["messageCount"], 2);
        assert_eq!(conversations[0]["lastMessage"], "Rest and hydrate.");

        let (_, _, body) = call(&h, authed(Method::DELETE, "/chat?conversationId=c-1", None)).await;
        assert_eq!(body, json!({ "deleted": 2, "conversationId": "c-1" }));
        assert!(h.backend.raw("chat:alice:c-1").is_empty());
    }

    #[tokio::test]
    async fn cached_history_is_sent_to_the_model() {
        let h = harness().await;
        let first = json!({ "conversationId": "c-2", "messages": [{ "role": "user", "content": "first" }] });
        call(&h, authed(Method::POST, "/chat", Some(first))).await;
        let second = json!({ "conversationId": "c-2", "messages": [{ "role": "user", "content": "second" }] });
        call(&h, authed(Method::POST, "/chat", Some(second))).await;

        let turns = h.transport.last_turns();
        let contents: Vec<String> = turns
            .iter()
            .map(|t| match t {
                ModelTurn::Text(m) => m.content.clone(),
                ModelTurn::MultiPart { .. } => String::new(),
            })
            .collect();
        assert_eq!(
            contents,
            ["You are a careful health assistant.", "first", "Rest and hydrate.", "second"]
        );
    }

    #[tokio::test]
    async fn durable_history_backs_up_an_empty_cache() {
        let h = harness().await;
        h.store
            .append_turns(
                "alice",
                "c-3",
                &[ChatMessage::user("from last week"), ChatMessage::assistant("noted")],
                None,
            )
            .await
            .unwrap();
        let send = json!({ "conversationId": "c-3", "messages": [{ "role": "user", "content": "follow up" }] });
        call(&h, authed(Method::POST, "/chat", Some(send))).await;

        let turns = h.transport.last_turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1], ModelTurn::Text(ChatMessage::user("from last week")));
    }

    #[tokio::test]
    async fn image_attachment_reaches_the_model_as_multi_part() {
        let h = harness().await;
        let send = json!({
            "messages": [{ "role": "user", "content": "what is this?" }],
            "attachments": [{ "type": "image", "filename": "a.png", "mimeType": "image/png", "dataUrl": "data:image/png;base64,AAAA" }]
        });
        let (status, _, _) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::OK);
        let turns = h.transport.last_turns();
        let Some(ModelTurn::MultiPart { parts, .. }) = turns.last() else {
            panic!("last turn should carry the image");
        };
        assert_eq!(parts[1], ContentPart::image("data:image/png;base64,AAAA"));
    }

    #[tokio::test]
    async fn opting_out_of_persistence_stores_nothing() {
        let h = harness().await;
        let send = json!({ "conversationId": "c-4", "persist": false, "messages": [{ "role": "user", "content": "private" }] });
        let (status, _, _) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.store.query_messages("alice", MessageQuery::all()).await.unwrap().is_empty());
        assert!(h.backend.raw("chat:alice:c-4").is_empty());
    }

    #[tokio::test]
    async fn model_timeout_is_a_gateway_timeout() {
        let h = harness_with(
            ScriptedTransport::default()
                .with("primary", Script::Hang)
                .with("fallback", Script::Hang),
        )
        .await;
        let send = json!({ "messages": [{ "role": "user", "content": "Hello" }] });
        let (status, _, body) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], TIMEOUT_HINT);
    }

    #[tokio::test]
    async fn upstream_rejection_is_a_generic_failure() {
        let h = harness_with(ScriptedTransport::default().with("primary", Script::Status(401))).await;
        let send = json!({ "messages": [{ "role": "user", "content": "Hello" }] });
        let (status, _, body) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to process chat request." }));
    }

    #[tokio::test]
    #[traced_test]
    async fn reply_survives_a_durable_write_failure() {
        let h = harness().await;
        h.store.close().await;
        let send = json!({ "messages": [{ "role": "user", "content": "my private symptom" }] });
        let (status, _, body) = call(&h, authed(Method::POST, "/chat", Some(send))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Rest and hydrate.");
        assert!(logs_contain("failed to persist exchange"));
        assert!(!logs_contain("my private symptom"));
    }

    #[tokio::test]
    async fn health_is_outside_the_guards() {
        let h = harness().await;
        let req = Request::builder()
            .uri("/health")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&h, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
