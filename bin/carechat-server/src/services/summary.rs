//! Conversation summaries, aggregated in memory from stored turns.

use std::collections::HashMap;

use carechat_types::ConversationSummary;

use crate::entities::StoredMessageRecord;

/// One summary per conversation, most recently updated first.
///
/// `records` may arrive in any order; timestamps compare lexicographically.
pub fn summarize(records: &[StoredMessageRecord]) -> Vec<ConversationSummary> {
    let mut by_conversation: HashMap<&str, ConversationSummary> = HashMap::new();
    for record in records {
        let entry = by_conversation
            .entry(record.conversation_id.as_str())
            .or_insert_with(|| ConversationSummary {
                conversation_id: record.conversation_id.clone(),
                created_at: record.created_at.clone(),
                updated_at: record.created_at.clone(),
                last_message: Some(record.content.clone()),
                message_count: 0,
            });
        entry.message_count += 1;
        if record.created_at < entry.created_at {
            entry.created_at = record.created_at.clone();
        }
        if record.created_at > entry.updated_at {
            entry.updated_at = record.created_at.clone();
            entry.last_message = Some(record.content.clone());
        }
    }

    let mut summaries: Vec<_> = by_conversation.into_values().collect();
    summaries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    summaries
}

#[cfg(test)]
mod test {
    use carechat_types::ChatRole;

    use super::*;

    fn record(conversation: &str, created_at: &str, content: &str) -> StoredMessageRecord {
        StoredMessageRecord {
            owner_id: "alice".into(),
            created_at: created_at.into(),
            conversation_id: conversation.into(),
            role: ChatRole::User,
            content: content.into(),
            ttl: None,
        }
    }

    #[test]
    fn empty_history_has_no_summaries() {
        assert!(summarize(&[]).is_empty());
    }

    #[test]
    fn summaries_aggregate_and_sort_by_recency() {
        let records = [
            record("a", "2026-01-01T00:00:01.000000Z", "a1"),
            record("b", "2026-01-01T00:00:02.000000Z", "b1"),
            record("a", "2026-01-01T00:00:03.000000Z", "a2"),
            record("b", "2026-01-01T00:00:00.500000Z", "b0"),
        ];
        let out = summarize(&records);
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].conversation_id, "a");
        assert_eq!(out[0].message_count, 2);
        assert_eq!(out[0].created_at, "2026-01-01T00:00:01.000000Z");
        assert_eq!(out[0].updated_at, "2026-01-01T00:00:03.000000Z");
        assert_eq!(out[0].last_message.as_deref(), Some("a2"));

        assert_eq!(out[1].conversation_id, "b");
        assert_eq!(out[1].created_at, "2026-01-01T00:00:00.500000Z");
        assert_eq!(out[1].last_message.as_deref(), Some("b1"));
    }
}
