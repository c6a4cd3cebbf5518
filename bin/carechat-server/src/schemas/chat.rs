//! `/chat` request and response bodies.
//!
//! Field names are camelCase on the wire to match the browser client.

use carechat_types::{ChatAttachment, ChatMessage, ConversationSummary, StoredMessage};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Existing conversation to continue; a new id is minted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// New turns from the caller, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub attachments: Vec<ChatAttachment>,
    /// `false` skips both cache and durable writes for this exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<bool>,
}

/// Response body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// The assistant's reply text.
    pub message: String,
    pub conversation_id: String,
}

/// Query string for `GET /chat` and `DELETE /chat`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ChatQuery {
    pub conversation_id: Option<String>,
    /// Most recent N messages (GET with `conversationId` only).
    pub limit: Option<u32>,
}

/// `GET /chat` without a conversation id.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
}

/// `GET /chat?conversationId=...`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessagesResponse {
    pub conversation_id: String,
    pub messages: Vec<StoredMessage>,
}

/// Response body for `DELETE /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConversationResponse {
    /// Durable records actually removed.
    pub deleted: u64,
    pub conversation_id: String,
}

/// Error body shared by every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
