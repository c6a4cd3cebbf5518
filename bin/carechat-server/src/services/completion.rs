//! Model Caller: one `chat/completions` call with timeout and a single
//! fallback attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carechat_types::ModelTurn;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ModelConfig;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("model endpoint must use https: {0}")]
    InsecureEndpoint(String),

    #[error("model provider is not configured: {0}")]
    NotConfigured(String),

    /// The call was aborted after exceeding its time budget.
    #[error("model {model} did not answer in time")]
    Timeout { model: String },

    #[error("model {model} answered with status {status}")]
    Upstream { model: String, status: u16 },

    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model response is unusable: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionError::Timeout { .. })
    }

    /// Only timeouts and provider-side 5xx are worth a second model.
    pub fn allows_fallback(&self) -> bool {
        match self {
            CompletionError::Timeout { .. } => true,
            CompletionError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// One request/response exchange with a completion provider.
#[async_trait]
pub trait CompletionTransport: Send + Sync + 'static {
    async fn complete(&self, model: &str, messages: &[ModelTurn]) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ModelTurn],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// HTTPS transport to an OpenAI-compatible `chat/completions` endpoint.
pub struct HttpTransport {
    client: Client,
    chat_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CompletionError> {
        let mut base = Url::parse(base_url).map_err(|e| CompletionError::NotConfigured(format!("base url: {e}")))?;
        if base.scheme() != "https" {
            return Err(CompletionError::InsecureEndpoint(base.scheme().to_owned()));
        }
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path().trim_end_matches('/')));
        }
        let chat_url = base
            .join(CHAT_COMPLETIONS_PATH)
            .map_err(|e| CompletionError::NotConfigured(format!("chat url: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CompletionError::NotConfigured("api key is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .https_only(true)
            .build()
            .map_err(|e| CompletionError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self { client, chat_url })
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn complete(&self, model: &str, messages: &[ModelTurn]) -> Result<String, CompletionError> {
        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&CompletionRequest { model, messages })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout { model: model.to_owned() }
                } else {
                    CompletionError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Upstream { model: model.to_owned(), status: status.as_u16() });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.without_url().to_string()))?;
        extract_reply(&body)
    }
}

fn extract_reply(body: &[u8]) -> Result<String, CompletionError> {
    let parsed: CompletionResponse =
        serde_json::from_slice(body).map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CompletionError::MalformedResponse("missing choices[0].message.content".into()))
}

/// Primary model with its own timeout, then at most one fallback attempt.
pub struct ModelCaller {
    transport: Arc<dyn CompletionTransport>,
    primary: String,
    fallback: Option<String>,
    primary_timeout: Duration,
    fallback_timeout: Duration,
}

impl ModelCaller {
    pub fn new(transport: Arc<dyn CompletionTransport>, cfg: &ModelConfig) -> Self {
        Self {
            transport,
            primary: cfg.primary_model.clone(),
            // A fallback equal to the primary would just repeat the failure.
            fallback: cfg.fallback_model.clone().filter(|f| *f != cfg.primary_model),
            primary_timeout: cfg.primary_timeout,
            fallback_timeout: cfg.fallback_timeout,
        }
    }

    /// Caller over HTTPS. Fails before any request is sent when the endpoint
    /// is not encrypted or no key is configured.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, CompletionError> {
        let api_key = cfg
            .api_key
            .as_deref()
            .ok_or_else(|| CompletionError::NotConfigured("missing api key".into()))?;
        let transport = HttpTransport::new(&cfg.base_url, api_key)?;
        Ok(Self::new(Arc::new(transport), cfg))
    }

    pub async fn complete(&self, messages: &[ModelTurn]) -> Result<String, CompletionError> {
        let err = match self.attempt(&self.primary, self.primary_timeout, messages).await {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        match self.fallback.as_deref() {
            Some(fallback) if err.allows_fallback() => {
                warn!(primary = %self.primary, fallback, error = %err, "primary model failed; trying fallback");
                self.attempt(fallback, self.fallback_timeout, messages).await
            }
            _ => Err(err),
        }
    }

    async fn attempt(&self, model: &str, budget: Duration, messages: &[ModelTurn]) -> Result<String, CompletionError> {
        debug!(model, turns = messages.len(), "calling model");
        // Dropping the in-flight future on timeout aborts the HTTP request.
        match timeout(budget, self.transport.complete(model, messages)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout { model: model.to_owned() }),
        }
    }
}
