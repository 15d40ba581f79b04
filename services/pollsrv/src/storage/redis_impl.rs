//! Redis snapshot sink
//!
//! Keys (prefix configurable, default `pollsrv`):
//! - `{prefix}:latest`  string, JSON of the latest batch
//! - `{prefix}:history` sorted set, JSON batches scored by epoch seconds

use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use super::{SnapshotSink, HISTORY_RETENTION};
use crate::core::config::RedisConfig;
use crate::core::types::Batch;

pub struct RedisSink {
    pool: Pool<RedisConnectionManager>,
    latest_key: String,
    history_key: String,
}

impl std::fmt::Debug for RedisSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSink")
            .field("latest_key", &self.latest_key)
            .field("history_key", &self.history_key)
            .field("pool_state", &self.pool.state())
            .finish()
    }
}

impl RedisSink {
    /// Build the pool and verify the server answers PING
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .context("Failed to create Redis connection manager")?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .await
            .context("Failed to build Redis connection pool")?;

        {
            let mut conn = pool
                .get()
                .await
                .context("Failed to get connection from pool for testing")?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .context("Failed to ping Redis server")?;
        }

        Ok(Self {
            pool,
            latest_key: format!("{}:latest", config.key_prefix),
            history_key: format!("{}:history", config.key_prefix),
        })
    }

    pub fn latest_key(&self) -> &str {
        &self.latest_key
    }

    pub fn history_key(&self) -> &str {
        &self.history_key
    }
}

/// Sorted-set score: batch time in epoch seconds
fn history_score(batch: &Batch) -> f64 {
    batch.timestamp.timestamp_millis() as f64 / 1000.0
}

/// Highest rank removed so that only the newest `HISTORY_RETENTION` remain
fn trim_stop() -> isize {
    -(HISTORY_RETENTION as isize) - 1
}

#[async_trait]
impl SnapshotSink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn store_latest(&self, batch: &Batch) -> Result<()> {
        let payload = serde_json::to_string(batch)?;
        let mut conn = self.pool.get().await.context("Redis pool")?;
        conn.set::<_, _, ()>(&self.latest_key, payload)
            .await
            .with_context(|| format!("SET {}", self.latest_key))?;
        Ok(())
    }

    async fn append_history(&self, batch: &Batch) -> Result<()> {
        let payload = serde_json::to_string(batch)?;
        let mut conn = self.pool.get().await.context("Redis pool")?;
        redis::pipe()
            .zadd(&self.history_key, payload, history_score(batch))
            .ignore()
            .zremrangebyrank(&self.history_key, 0, trim_stop())
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .with_context(|| format!("ZADD {}", self.history_key))?;
        debug!("Appended batch to {}", self.history_key);
        Ok(())
    }

    async fn get_latest(&self) -> Result<Option<Batch>> {
        let mut conn = self.pool.get().await.context("Redis pool")?;
        let raw: Option<String> = conn
            .get(&self.latest_key)
            .await
            .with_context(|| format!("GET {}", self.latest_key))?;
        raw.map(|s| serde_json::from_str(&s).context("Invalid latest snapshot"))
            .transpose()
    }

    async fn get_history(&self, limit: usize) -> Result<Vec<Batch>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.context("Redis pool")?;
        let raw: Vec<String> = conn
            .zrevrange(&self.history_key, 0, limit as isize - 1)
            .await
            .with_context(|| format!("ZREVRANGE {}", self.history_key))?;
        raw.iter()
            .map(|s| serde_json::from_str(s).context("Invalid history entry"))
            .collect()
    }
}
