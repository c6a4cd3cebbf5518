//! Request Dispatcher for `/chat`.
//!
//! Origin and caller checks run as middleware before these handlers (see
//! [`crate::routes::build`]); every handler here receives a verified
//! [`Caller`] and only ever touches that caller's partition.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use bytes::Bytes;
use carechat_types::{ChatMessage, StoredMessage};
use chrono::Utc;
use tracing::{debug, error, info};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::auth::Caller;
use crate::cache::CacheOutcome;
use crate::entities::{expiry_after_days, MessageQuery, MessageStore, StoredMessageRecord};
use crate::error::ServerError;
use crate::schemas::chat::{
    ChatQuery, ConversationListResponse, ConversationMessagesResponse, DeleteConversationResponse,
    ErrorResponse, SendMessageRequest, SendMessageResponse,
};
use crate::services::context::build_context;
use crate::services::summary::summarize;
use crate::state::AppState;

/// Longest accepted caller-supplied conversation id, in characters.
pub const MAX_CONVERSATION_ID_CHARS: usize = 128;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(OpenApi)]
#[openapi(
    paths(send_message, get_conversations, delete_conversation),
    components(schemas(
        SendMessageRequest,
        SendMessageResponse,
        ConversationListResponse,
        ConversationMessagesResponse,
        DeleteConversationResponse,
        ErrorResponse,
        StoredMessage,
    ))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/chat",
        get(get_conversations).post(send_message).delete(delete_conversation),
    )
}

/// `conv_<unix millis>_<6 base-36 chars>`, the suffix drawn from a v4 UUID.
fn mint_conversation_id() -> String {
    let mut entropy = Uuid::new_v4().as_u128();
    let suffix: String = (0..6)
        .map(|_| {
            let c = ID_ALPHABET[(entropy % 36) as usize] as char;
            entropy /= 36;
            c
        })
        .collect();
    format!("conv_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Trimmed, non-empty id, or `None` when the caller supplied nothing usable.
fn validated_conversation_id(raw: Option<&str>) -> Result<Option<String>, ServerError> {
    let Some(id) = raw.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    if id.chars().count() > MAX_CONVERSATION_ID_CHARS || id.chars().any(char::is_control) {
        return Err(ServerError::BadRequest("Invalid conversationId.".into()));
    }
    Ok(Some(id.to_owned()))
}

fn parse_query(query: Result<Query<ChatQuery>, QueryRejection>) -> Result<ChatQuery, ServerError> {
    query
        .map(|Query(q)| q)
        .map_err(|_| ServerError::BadRequest("Invalid query string.".into()))
}

/// Prior turns for a continuing conversation: the cache first, durable
/// records when the cache has nothing.
async fn load_history(state: &AppState, owner_id: &str, conversation_id: &str) -> Result<Vec<ChatMessage>, ServerError> {
    if let CacheOutcome::Ok(turns) = state.cache.load(owner_id, conversation_id).await {
        if !turns.is_empty() {
            debug!(turns = turns.len(), "history from session cache");
            return Ok(turns);
        }
    }
    let limit = u32::try_from(state.config.cache.message_limit.max(1)).unwrap_or(u32::MAX);
    let records = state
        .store
        .query_messages(owner_id, MessageQuery::conversation(conversation_id).with_limit(Some(limit)))
        .await?;
    debug!(turns = records.len(), "history from durable store");
    Ok(records.iter().map(StoredMessageRecord::to_message).collect())
}

/// Write the exchange to both stores concurrently.
///
/// The reply has already been paid for, so a durable failure is logged and
/// the caller still gets it.
async fn persist_exchange(state: &AppState, owner_id: &str, conversation_id: &str, turns: &[ChatMessage]) {
    let ttl = expiry_after_days(state.config.record_ttl_days);
    let (cached, durable) = tokio::join!(
        state.cache.append(owner_id, conversation_id, turns),
        state.store.append_turns(owner_id, conversation_id, turns, ttl),
    );
    if !cached.is_ok() {
        debug!("exchange not cached");
    }
    if let Err(e) = durable {
        error!(error = %e, turns = turns.len(), "failed to persist exchange; reply returned anyway");
    }
}

/// Send new turns and get the assistant's reply (`POST /chat`).
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Assistant reply", body = SendMessageResponse),
        (status = 400, description = "Missing body or messages", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Origin not allowed", body = ErrorResponse),
        (status = 504, description = "Model timed out", body = ErrorResponse),
        (status = 500, description = "Processing failed", body = ErrorResponse),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<Json<SendMessageResponse>, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServerError::BadRequest("Missing request body.".into()));
    }
    let req: SendMessageRequest = serde_json::from_slice(&body)
        .map_err(|_| ServerError::BadRequest("Invalid request body.".into()))?;
    if req.messages.is_empty() {
        return Err(ServerError::BadRequest("Request must include messages.".into()));
    }

    let owner_id = caller.owner_id.as_str();
    let supplied = validated_conversation_id(req.conversation_id.as_deref())?;
    let history = match &supplied {
        Some(id) => load_history(&state, owner_id, id).await?,
        None => Vec::new(),
    };
    let conversation_id = supplied.unwrap_or_else(mint_conversation_id);

    let turns = build_context(
        state.config.system_prompt.as_deref(),
        history,
        &req.messages,
        &req.attachments,
        &state.config.context,
    );
    let reply = state.model.complete(&turns).await?;

    if req.persist != Some(false) {
        let mut exchange = req.messages;
        exchange.push(ChatMessage::assistant(reply.clone()));
        persist_exchange(&state, owner_id, &conversation_id, &exchange).await;
    }

    info!(%owner_id, %conversation_id, "chat reply sent");
    Ok(Json(SendMessageResponse { message: reply, conversation_id }))
}

/// List conversations, or one conversation's messages (`GET /chat`).
#[utoipa::path(
    get,
    path = "/chat",
    tag = "chat",
    params(ChatQuery),
    responses(
        (status = 200, description = "Summaries, or messages when conversationId is given", body = ConversationListResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn get_conversations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Response, ServerError> {
    let query = parse_query(query)?;
    let owner_id = caller.owner_id.as_str();

    let Some(conversation_id) = validated_conversation_id(query.conversation_id.as_deref())? else {
        let records = state.store.query_messages(owner_id, MessageQuery::all()).await?;
        let conversations = summarize(&records);
        return Ok(Json(ConversationListResponse { conversations }).into_response());
    };

    let records = state
        .store
        .query_messages(owner_id, MessageQuery::conversation(&conversation_id).with_limit(query.limit))
        .await?;
    let messages = records.iter().map(StoredMessageRecord::to_response).collect();
    Ok(Json(ConversationMessagesResponse { conversation_id, messages }).into_response())
}

/// Delete one conversation (`DELETE /chat?conversationId=...`).
#[utoipa::path(
    delete,
    path = "/chat",
    tag = "chat",
    params(ChatQuery),
    responses(
        (status = 200, description = "Conversation deleted", body = DeleteConversationResponse),
        (status = 400, description = "Missing conversationId", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Json<DeleteConversationResponse>, ServerError> {
    let query = parse_query(query)?;
    let owner_id = caller.owner_id.as_str();
    let conversation_id = validated_conversation_id(query.conversation_id.as_deref())?
        .ok_or_else(|| ServerError::BadRequest("Missing conversationId.".into()))?;

    let deleted = state.store.delete_conversation(owner_id, &conversation_id).await?;
    if !state.cache.forget(owner_id, &conversation_id).await.is_ok() {
        debug!("cached turns not removed");
    }
    info!(%owner_id, %conversation_id, deleted, "conversation deleted");
    Ok(Json(DeleteConversationResponse { deleted, conversation_id }))
}
