//! Durable conversation store.
//!
//! [`MessageStore`] is the interface the dispatcher talks to; the default
//! implementation is [`SqliteStore`]. Every query is scoped by the verified
//! owner id, which is also the leading column of the primary key.
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required.

pub mod chat;
pub mod dao;

pub use chat::{MessageQuery, MessageStore};
pub use dao::StoredMessageRecord;

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// SQLite-backed conversation store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<MonotonicClock>,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://carechat.db"`
    /// or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            // Every connection to `:memory:` is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .acquire_timeout(Duration::from_secs(5))
                .connect_with(options)
                .await?
        };
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, clock: Arc::new(MonotonicClock::default()) })
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Next sort key for a new record. Strictly increasing within the process.
    pub fn next_created_at(&self) -> String {
        self.clock.next().to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Issues strictly increasing microsecond timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last_micros.compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return DateTime::from_timestamp_micros(candidate).unwrap_or_else(Utc::now),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Unix-seconds expiry `days` from now, or `None` when `days` is zero.
pub fn expiry_after_days(days: u32) -> Option<i64> {
    (days > 0).then(|| Utc::now().timestamp() + i64::from(days) * 86_400)
}
