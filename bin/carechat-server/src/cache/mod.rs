//! Encrypted, best-effort session cache of recent conversation turns.
//!
//! Turns live in a list keyed `chat:{owner}:{conversation}`; each entry is a
//! JSON-encoded [`ChatMessage`] sealed by [`TurnCipher`]. Every operation
//! returns a [`CacheOutcome`] and never an error: when the backend cannot be
//! reached the shared [`CacheHealth`] flips to unavailable and all later
//! operations short-circuit until it is reset.

pub mod cipher;
#[cfg(test)]
pub mod memory;
pub mod redis_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use carechat_types::ChatMessage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

pub use cipher::TurnCipher;
pub use redis_backend::RedisBackend;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connect(String),

    #[error("cache operation timed out")]
    Timeout,

    #[error("cache command failed: {0}")]
    Command(String),
}

impl CacheError {
    /// Failures that indicate the cache is unreachable rather than a bad command.
    fn is_outage(&self) -> bool {
        matches!(self, CacheError::Connect(_) | CacheError::Timeout)
    }
}

/// Result of a cache operation as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome<T> {
    Ok(T),
    Unavailable,
}

impl<T> CacheOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CacheOutcome::Ok(_))
    }
}

/// List operations the session cache needs from a key-value store.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Up to the last `limit` entries of the list at `key`, oldest first.
    async fn tail(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError>;

    /// Push `values` onto the list and reset its expiry.
    async fn append(&self, key: &str, values: Vec<String>, ttl_seconds: u64) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-wide cache availability flag.
///
/// Races are harmless: a stale "available" costs one wasted connect attempt
/// and a stale "unavailable" costs one cache miss.
#[derive(Debug, Default)]
pub struct CacheHealth {
    unavailable: AtomicBool,
}

impl CacheHealth {
    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    pub fn mark_unavailable(&self) {
        if !self.unavailable.swap(true, Ordering::Relaxed) {
            warn!("session cache marked unavailable; continuing without it");
        }
    }

    pub fn reset(&self) {
        self.unavailable.store(false, Ordering::Relaxed);
    }
}

pub struct SessionCache {
    backend: Option<Arc<dyn CacheBackend>>,
    cipher: Option<TurnCipher>,
    health: Arc<CacheHealth>,
    message_limit: usize,
    ttl_seconds: u64,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("backend", &self.backend.is_some())
            .field("encrypted", &self.cipher.is_some())
            .field("health", &self.health)
            .field("message_limit", &self.message_limit)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl SessionCache {
    pub fn new(
        backend: Option<Arc<dyn CacheBackend>>,
        cipher: Option<TurnCipher>,
        health: Arc<CacheHealth>,
        message_limit: usize,
        ttl_seconds: u64,
    ) -> Self {
        Self { backend, cipher, health, message_limit, ttl_seconds }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(None, None, Arc::new(CacheHealth::default()), 0, 0)
    }

    /// Build from configuration. Without an endpoint, or without usable key
    /// material, the cache stays disabled so plaintext is never written.
    pub fn from_config(cfg: &CacheConfig, health: Arc<CacheHealth>) -> Self {
        if !cfg.enabled {
            info!("session cache disabled by configuration");
            return Self::disabled();
        }
        let Some(key) = cfg.usable_key() else {
            warn!("session cache encryption key missing or too short; cache disabled");
            return Self::disabled();
        };
        let url = match cfg.redis_url() {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!("no session cache host configured; cache disabled");
                return Self::disabled();
            }
            Err(e) => {
                warn!(error = %e, "invalid session cache endpoint; cache disabled");
                return Self::disabled();
            }
        };
        match RedisBackend::new(&url, cfg.connect_timeout, cfg.command_timeout) {
            Ok(backend) => Self::new(
                Some(Arc::new(backend)),
                Some(TurnCipher::new(key)),
                health,
                cfg.message_limit,
                cfg.ttl_seconds,
            ),
            Err(e) => {
                warn!(error = %e, "session cache client could not be created; cache disabled");
                Self::disabled()
            }
        }
    }

    /// `chat:{owner}:{conversation}` with `%` and `:` escaped in both parts,
    /// so distinct pairs never share a key.
    pub fn key(owner_id: &str, conversation_id: &str) -> String {
        format!("chat:{}:{}", escape_key_part(owner_id), escape_key_part(conversation_id))
    }

    pub fn health(&self) -> &Arc<CacheHealth> {
        &self.health
    }

    fn active(&self) -> Option<(&dyn CacheBackend, &TurnCipher)> {
        match (&self.backend, &self.cipher) {
            (Some(backend), Some(cipher)) if self.health.is_available() => Some((backend.as_ref(), cipher)),
            _ => None,
        }
    }

    fn absorb<T>(&self, op: &'static str, err: CacheError) -> CacheOutcome<T> {
        if err.is_outage() {
            self.health.mark_unavailable();
        }
        warn!(op, error = %err, "session cache operation failed");
        CacheOutcome::Unavailable
    }

    /// Recent turns, oldest first. Entries that fail to open or parse are dropped.
    pub async fn load(&self, owner_id: &str, conversation_id: &str) -> CacheOutcome<Vec<ChatMessage>> {
        let Some((backend, cipher)) = self.active() else {
            return CacheOutcome::Unavailable;
        };
        let raw = match backend.tail(&Self::key(owner_id, conversation_id), self.message_limit).await {
            Ok(raw) => raw,
            Err(e) => return self.absorb("load", e),
        };

        let skip = raw.len().saturating_sub(self.message_limit);
        let total = raw.len() - skip;
        let turns: Vec<ChatMessage> = raw
            .iter()
            .skip(skip)
            .filter_map(|entry| {
                let bytes = cipher.open(entry).ok()?;
                serde_json::from_slice(&bytes).ok()
            })
            .collect();
        if turns.len() < total {
            debug!(dropped = total - turns.len(), "dropped unreadable cache entries");
        }
        CacheOutcome::Ok(turns)
    }

    /// Append turns, each sealed individually, and slide the key's expiry.
    pub async fn append(&self, owner_id: &str, conversation_id: &str, turns: &[ChatMessage]) -> CacheOutcome<()> {
        let Some((backend, cipher)) = self.active() else {
            return CacheOutcome::Unavailable;
        };
        let mut sealed = Vec::with_capacity(turns.len());
        for turn in turns {
            let value = serde_json::to_vec(turn)
                .ok()
                .and_then(|json| cipher.seal(&json).ok());
            match value {
                Some(value) => sealed.push(value),
                None => {
                    warn!("failed to seal a turn for the session cache; skipping write");
                    return CacheOutcome::Unavailable;
                }
            }
        }
        match backend
            .append(&Self::key(owner_id, conversation_id), sealed, self.ttl_seconds)
            .await
        {
            Ok(()) => CacheOutcome::Ok(()),
            Err(e) => self.absorb("append", e),
        }
    }

    /// Drop a conversation's cached turns.
    pub async fn forget(&self, owner_id: &str, conversation_id: &str) -> CacheOutcome<()> {
        let Some((backend, _)) = self.active() else {
            return CacheOutcome::Unavailable;
        };
        match backend.remove(&Self::key(owner_id, conversation_id)).await {
            Ok(()) => CacheOutcome::Ok(()),
            Err(e) => self.absorb("forget", e),
        }
    }
}

fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace(':', "%3A")
}
