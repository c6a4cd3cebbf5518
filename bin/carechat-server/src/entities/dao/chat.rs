use carechat_types::{ChatMessage, ChatRole, StoredMessage};

/// A single row in the `chat_messages` table.
///
/// `(owner_id, created_at)` is the primary key; `created_at` is an RFC 3339
/// timestamp with microsecond precision, so it also sorts lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessageRecord {
    pub owner_id: String,
    pub created_at: String,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    /// Expiry as Unix seconds; `None` never expires.
    pub ttl: Option<i64>,
}

impl StoredMessageRecord {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }

    pub fn to_response(&self) -> StoredMessage {
        StoredMessage {
            role: self.role,
            content: self.content.clone(),
            created_at: self.created_at.clone(),
        }
    }
}
