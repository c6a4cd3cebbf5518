//! Model-facing turn representation.
//!
//! A turn is either plain text or a multi-part structure (one text part plus
//! image parts). The shape is decided once when the context is assembled;
//! serialization produces the `chat/completions` wire format, where
//! `content` is a string for text turns and an array for multi-part turns.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTurn {
    Text(ChatMessage),
    MultiPart { role: ChatRole, parts: Vec<ContentPart> },
}

/// One element of a multi-part turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl { image_url: ImageUrl { url: url.into() } }
    }
}

impl ModelTurn {
    pub fn role(&self) -> ChatRole {
        match self {
            ModelTurn::Text(msg) => msg.role,
            ModelTurn::MultiPart { role, .. } => *role,
        }
    }

    pub fn is_multi_part(&self) -> bool {
        matches!(self, ModelTurn::MultiPart { .. })
    }
}

impl From<ChatMessage> for ModelTurn {
    fn from(msg: ChatMessage) -> Self {
        ModelTurn::Text(msg)
    }
}

impl Serialize for ModelTurn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(untagged)]
        enum Content<'a> {
            Text(&'a str),
            Parts(&'a [ContentPart]),
        }

        #[derive(Serialize)]
        struct Wire<'a> {
            role: ChatRole,
            content: Content<'a>,
        }

        let wire = match self {
            ModelTurn::Text(msg) => Wire { role: msg.role, content: Content::Text(&msg.content) },
            ModelTurn::MultiPart { role, parts } => Wire { role: *role, content: Content::Parts(parts) },
        };
        wire.serialize(serializer)
    }
}
