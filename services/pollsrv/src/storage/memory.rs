//! In-process snapshot sink

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;

use super::{SnapshotSink, HISTORY_RETENTION};
use crate::core::types::Batch;

#[derive(Debug)]
pub struct MemorySink {
    latest: RwLock<Option<Batch>>,
    /// Oldest at the front
    history: RwLock<VecDeque<Batch>>,
    retention: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_retention(HISTORY_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            latest: RwLock::new(None),
            history: RwLock::new(VecDeque::with_capacity(retention.min(HISTORY_RETENTION))),
            retention,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn store_latest(&self, batch: &Batch) -> Result<()> {
        *self.latest.write() = Some(batch.clone());
        Ok(())
    }

    async fn append_history(&self, batch: &Batch) -> Result<()> {
        let mut history = self.history.write();
        history.push_back(batch.clone());
        while history.len() > self.retention {
            history.pop_front();
        }
        Ok(())
    }

    async fn get_latest(&self) -> Result<Option<Batch>> {
        Ok(self.latest.read().clone())
    }

    async fn get_history(&self, limit: usize) -> Result<Vec<Batch>> {
        Ok(self.history.read().iter().rev().take(limit).cloned().collect())
    }
}
