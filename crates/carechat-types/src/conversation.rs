use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::chat::ChatRole;

/// Aggregate view of one conversation, derived from its stored turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// Timestamp of the earliest stored turn.
    pub created_at: String,
    /// Timestamp of the latest stored turn.
    pub updated_at: String,
    /// Content of the latest stored turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub message_count: u64,
}

/// A stored turn as returned when listing a conversation's messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}
