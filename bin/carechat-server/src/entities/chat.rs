use std::future::Future;
use std::str::FromStr;

use carechat_types::{ChatMessage, ChatRole};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};

use crate::entities::{dao::StoredMessageRecord, SqliteStore};

/// Upper bound on concurrent single-row deletes when purging a conversation.
const DELETE_FANOUT: usize = 8;

const INSERT_MESSAGE: &str = "INSERT INTO chat_messages (owner_id, created_at, conversation_id, role, content, ttl) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Filter for [`MessageStore::query_messages`].
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Restrict to one conversation.
    pub conversation_id: Option<String>,
    /// Keep only the most recent `limit` records.
    pub limit: Option<u32>,
}

impl MessageQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        Self { conversation_id: Some(conversation_id.into()), limit: None }
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

pub trait MessageStore: Send + Sync + 'static {
    fn append_message(
        &self,
        record: StoredMessageRecord,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Unexpired records of `owner_id` matching `query`, oldest first.
    fn query_messages(
        &self,
        owner_id: &str,
        query: MessageQuery,
    ) -> impl Future<Output = Result<Vec<StoredMessageRecord>, sqlx::Error>> + Send;

    /// Delete every record of one conversation; returns the rows removed.
    fn delete_conversation(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Delete records whose TTL has passed.
    fn purge_expired(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

impl SqliteStore {
    /// Append `turns` in order, each with a fresh sort key. All or nothing:
    /// a user turn is never stored without the reply written alongside it.
    pub async fn append_turns(
        &self,
        owner_id: &str,
        conversation_id: &str,
        turns: &[ChatMessage],
        ttl: Option<i64>,
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for turn in turns {
            sqlx::query(INSERT_MESSAGE)
                .bind(owner_id)
                .bind(self.next_created_at())
                .bind(conversation_id)
                .bind(turn.role.to_string())
                .bind(&turn.content)
                .bind(ttl)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(turns.len())
    }
}

impl MessageStore for SqliteStore {
    async fn append_message(&self, record: StoredMessageRecord) -> Result<(), sqlx::Error> {
        sqlx::query(INSERT_MESSAGE)
            .bind(&record.owner_id)
            .bind(&record.created_at)
            .bind(&record.conversation_id)
            .bind(record.role.to_string())
            .bind(&record.content)
            .bind(record.ttl)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_messages(
        &self,
        owner_id: &str,
        query: MessageQuery,
    ) -> Result<Vec<StoredMessageRecord>, sqlx::Error> {
        let now = Utc::now().timestamp();
        // SQLite treats a negative LIMIT as "no limit".
        let limit = query.limit.map(i64::from).unwrap_or(-1);
        let rows: Vec<(String, String, String, String, String, Option<i64>)> = sqlx::query_as(
            "SELECT owner_id, created_at, conversation_id, role, content, ttl \
             FROM chat_messages \
             WHERE owner_id = ?1 \
               AND (?2 IS NULL OR conversation_id = ?2) \
               AND (ttl IS NULL OR ttl > ?3) \
             ORDER BY created_at DESC LIMIT ?4",
        )
        .bind(owner_id)
        .bind(query.conversation_id.as_deref())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<StoredMessageRecord> = rows
            .into_iter()
            .filter_map(|(owner_id, created_at, conversation_id, role, content, ttl)| {
                match ChatRole::from_str(&role) {
                    Ok(role) => Some(StoredMessageRecord { owner_id, created_at, conversation_id, role, content, ttl }),
                    Err(_) => {
                        tracing::warn!(raw = %role, created_at = %created_at, "skipping record with unknown role");
                        None
                    }
                }
            })
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn delete_conversation(&self, owner_id: &str, conversation_id: &str) -> Result<u64, sqlx::Error> {
        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT created_at FROM chat_messages WHERE owner_id = ?1 AND conversation_id = ?2",
        )
        .bind(owner_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        // Delete by exact sort key so rows appended after the read survive.
        futures::stream::iter(keys)
            .map(|(created_at,)| async move {
                sqlx::query("DELETE FROM chat_messages WHERE owner_id = ?1 AND created_at = ?2")
                    .bind(owner_id)
                    .bind(&created_at)
                    .execute(&self.pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .buffer_unordered(DELETE_FANOUT)
            .try_fold(0u64, |acc, n| async move { Ok(acc + n) })
            .await
    }

    async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("DELETE FROM chat_messages WHERE ttl IS NOT NULL AND ttl <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
