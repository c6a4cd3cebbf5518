//! Shared types for the carechat request pipeline.

pub mod chat;
pub mod conversation;
pub mod model;

pub use chat::{AttachmentKind, ChatAttachment, ChatMessage, ChatRole};
pub use conversation::{ConversationSummary, StoredMessage};
pub use model::{ContentPart, ImageUrl, ModelTurn};
