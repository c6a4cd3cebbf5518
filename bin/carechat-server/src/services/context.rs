//! Context Assembler.
//!
//! Pure functions that turn the system prompt, prior history and the live
//! request into the exact turn list sent to the model. No I/O happens here.

use carechat_types::{ChatAttachment, ChatMessage, ChatRole, ContentPart, ModelTurn};
use tracing::debug;

use crate::config::ContextConfig;

/// Appended to a truncated message. Counts toward the character cap.
pub const ELLIPSIS: char = '…';

/// Prior history oldest to newest, then the new turns.
pub fn assemble(history: Vec<ChatMessage>, incoming: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + incoming.len());
    messages.extend(history);
    messages.extend_from_slice(incoming);
    messages
}

/// Keep the last `max_messages` turns and cap each turn's length.
///
/// Every turn counts against the window whatever its role, including system
/// turns sent by the client. Applying this to its own output returns it
/// unchanged.
pub fn compact(messages: Vec<ChatMessage>, limits: &ContextConfig) -> Vec<ChatMessage> {
    let skip = messages.len().saturating_sub(limits.max_messages);
    messages
        .into_iter()
        .skip(skip)
        .map(|mut m| {
            m.content = truncate(m.content, limits.max_message_chars);
            m
        })
        .collect()
}

/// Put the configured system prompt in front. It sits outside the window and
/// is never truncated.
pub fn with_system_prompt(system_prompt: Option<&str>, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) else {
        return messages;
    };
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(prompt));
    out.extend(messages);
    out
}

fn truncate(content: String, cap: usize) -> String {
    if content.chars().count() <= cap {
        return content;
    }
    let mut out: String = content.chars().take(cap.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Attach eligible images to the most recent user turn.
///
/// Only image attachments with an inline data payload count, and at most
/// `max_attachments` of them. Without any, every turn stays plain text.
pub fn bind_attachments(
    messages: Vec<ChatMessage>,
    attachments: &[ChatAttachment],
    max_attachments: usize,
) -> Vec<ModelTurn> {
    let images: Vec<&str> = attachments
        .iter()
        .filter_map(ChatAttachment::inline_image)
        .take(max_attachments)
        .collect();
    let target = if images.is_empty() {
        None
    } else {
        messages.iter().rposition(|m| m.role == ChatRole::User)
    };
    if !images.is_empty() && target.is_none() {
        debug!(images = images.len(), "no user turn to carry attachments; dropping them");
    }

    messages
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            if Some(i) != target {
                return ModelTurn::Text(m);
            }
            let mut parts = Vec::with_capacity(images.len() + 1);
            parts.push(ContentPart::text(m.content));
            parts.extend(images.iter().map(|url| ContentPart::image(*url)));
            ModelTurn::MultiPart { role: m.role, parts }
        })
        .collect()
}

/// Full pipeline: assemble, compact, prepend the prompt, bind attachments.
pub fn build_context(
    system_prompt: Option<&str>,
    history: Vec<ChatMessage>,
    incoming: &[ChatMessage],
    attachments: &[ChatAttachment],
    limits: &ContextConfig,
) -> Vec<ModelTurn> {
    let compacted = compact(assemble(history, incoming), limits);
    bind_attachments(with_system_prompt(system_prompt, compacted), attachments, limits.max_attachments)
}
