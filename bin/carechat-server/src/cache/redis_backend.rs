//! Redis list backend for the session cache.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use super::{CacheBackend, CacheError};

/// Lazily connected Redis client; the first command pays the connect cost.
pub struct RedisBackend {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RedisBackend {
    pub fn new(url: &str, connect_timeout: Duration, command_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Connect(e.to_string()))?;
        Ok(Self { client, connection: OnceCell::new(), connect_timeout, command_timeout })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                match timeout(self.connect_timeout, self.client.get_multiplexed_async_connection()).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(CacheError::Connect(e.to_string())),
                    Err(_) => Err(CacheError::Timeout),
                }
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.command_timeout, op).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) if e.is_io_error() || e.is_connection_dropped() => Err(CacheError::Connect(e.to_string())),
            Ok(Err(e)) => Err(CacheError::Command(e.to_string())),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn tail(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let start = -(limit.max(1) as isize);
        self.bounded(conn.lrange(key, start, -1)).await
    }

    async fn append(&self, key: &str, values: Vec<String>, ttl_seconds: u64) -> Result<(), CacheError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for value in values {
            pipe.rpush(key, value).ignore();
        }
        pipe.expire(key, ttl_seconds as i64).ignore();
        self.bounded(pipe.query_async(&mut conn)).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.del(key)).await
    }
}
