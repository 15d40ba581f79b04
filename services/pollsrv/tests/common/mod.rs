//! Shared test fixtures: device configs, mock-backed links and a recording sink

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pollsrv::core::config::DeviceConfig;
use pollsrv::core::types::Batch;
use pollsrv::link::{DeviceLink, MockDriver, MockState};
use pollsrv::storage::{MemorySink, SnapshotSink};

/// 1 s poll, 0.5 s timeout
pub fn device(retries: u32) -> DeviceConfig {
    DeviceConfig {
        host: "10.0.0.5".to_string(),
        port: 502,
        device_id: 1,
        poll_interval: 1.0,
        timeout: 0.5,
        retries,
    }
}

/// Link over a fresh mock, plus the handle to script it
pub fn mock_link(config: DeviceConfig) -> (Arc<DeviceLink>, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = driver.state();
    (Arc::new(DeviceLink::new(config, Box::new(driver))), state)
}

/// Memory sink that counts calls
#[derive(Default)]
pub struct RecordingSink {
    inner: MemorySink,
    latest_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn store_latest(&self, batch: &Batch) -> anyhow::Result<()> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store_latest(batch).await
    }

    async fn append_history(&self, batch: &Batch) -> anyhow::Result<()> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.append_history(batch).await
    }

    async fn get_latest(&self) -> anyhow::Result<Option<Batch>> {
        self.inner.get_latest().await
    }

    async fn get_history(&self, limit: usize) -> anyhow::Result<Vec<Batch>> {
        self.inner.get_history(limit).await
    }
}
