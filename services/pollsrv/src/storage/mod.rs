//! Snapshot sink
//!
//! Latest batch plus a bounded, time-ordered history. Backends report errors
//! with `anyhow`; the governor logs and swallows them.

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::Batch;

pub mod memory;
pub mod redis_impl;

pub use memory::MemorySink;
pub use redis_impl::RedisSink;

/// Maximum number of batches kept in history
pub const HISTORY_RETENTION: usize = 1000;

#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    /// Backend name for logs and status
    fn name(&self) -> &'static str;

    /// Overwrite the most recent snapshot
    async fn store_latest(&self, batch: &Batch) -> Result<()>;

    /// Append to history, evicting the oldest beyond `HISTORY_RETENTION`
    async fn append_history(&self, batch: &Batch) -> Result<()>;

    async fn get_latest(&self) -> Result<Option<Batch>>;

    /// Up to `limit` batches, newest first
    async fn get_history(&self, limit: usize) -> Result<Vec<Batch>>;
}
