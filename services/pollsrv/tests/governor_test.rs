//! Governor loop tests on paused time
//!
//! - emission of non-empty batches
//! - circuit breaker after consecutive empty cycles or failed reconnects
//! - reconnect after a dropped session
//! - stop, join and restart semantics

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{device, mock_link, RecordingSink};
use pollsrv::core::catalog::{RegisterCatalog, RegisterKind, RegisterSpec};
use pollsrv::core::config::ReconnectConfig;
use pollsrv::core::types::{Batch, EngineState, RegisterValues};
use pollsrv::engine::{Governor, ReconnectPolicy, CIRCUIT_BREAKER_THRESHOLD};
use pollsrv::link::{MockFailure, MockState};
use pollsrv::storage::SnapshotSink;
use pollsrv::PollSrvError;

fn holding_catalog() -> Arc<RegisterCatalog> {
    let spec = RegisterSpec::new(1, 4, RegisterKind::Holding);
    Arc::new(RegisterCatalog::from_specs([spec]).unwrap())
}

async fn connected_governor() -> (Governor, Arc<MockState>, Arc<RecordingSink>) {
    let (link, state) = mock_link(device(1));
    state.set_holding(1, &[10, 20, 30, 40]);
    link.connect().await.unwrap();
    let sink = RecordingSink::new();
    let governor = Governor::new(link, holding_catalog(), sink.clone());
    (governor, state, sink)
}

async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Sink whose writes always fail
#[derive(Default)]
struct BrokenSink {
    writes: AtomicUsize,
}

#[async_trait]
impl SnapshotSink for BrokenSink {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn store_latest(&self, _batch: &Batch) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("store unavailable")
    }

    async fn append_history(&self, _batch: &Batch) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("store unavailable")
    }

    async fn get_latest(&self) -> anyhow::Result<Option<Batch>> {
        Ok(None)
    }

    async fn get_history(&self, _limit: usize) -> anyhow::Result<Vec<Batch>> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn test_healthy_cycle_emits_batch() {
    let (governor, _state, sink) = connected_governor().await;

    governor.start().await.unwrap();
    advance(100).await;

    assert_eq!(sink.latest_calls(), 1);
    assert_eq!(sink.history_calls(), 1);
    assert_eq!(governor.consecutive_errors(), 0);
    assert_eq!(governor.state(), EngineState::Monitoring);

    let latest = sink.get_latest().await.unwrap().unwrap();
    assert_eq!(latest.len(), 1);
    let reading = &latest.readings[0];
    assert_eq!(reading.address, 1);
    assert_eq!(reading.kind, RegisterKind::Holding);
    assert_eq!(reading.values, RegisterValues::Words(vec![10, 20, 30, 40]));

    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_polls_every_interval() {
    let (governor, _state, sink) = connected_governor().await;

    governor.start().await.unwrap();
    advance(2100).await;

    assert_eq!(sink.latest_calls(), 3);
    let status = governor.status();
    assert_eq!(status.cycles, 3);
    assert_eq!(status.batches_emitted, 3);
    assert!(status.last_batch_at.is_some());

    let history = sink.get_history(10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].timestamp >= history[1].timestamp);
    assert!(history[1].timestamp >= history[2].timestamp);

    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_trips_after_empty_cycles() {
    let (governor, state, sink) = connected_governor().await;
    state.fail_all(Some(MockFailure::Exception));

    governor.start().await.unwrap();
    let final_state = governor.join().await.unwrap();

    assert_eq!(final_state, EngineState::Faulted);
    assert_eq!(governor.state(), EngineState::Faulted);
    assert_eq!(governor.consecutive_errors(), CIRCUIT_BREAKER_THRESHOLD);
    assert_eq!(governor.status().cycles, u64::from(CIRCUIT_BREAKER_THRESHOLD));
    assert_eq!(sink.latest_calls(), 0);
    assert!(!governor.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_keeps_breaker_closed() {
    let (link, state) = mock_link(device(1));
    state.set_holding(1, &[1, 2, 3, 4]);
    link.connect().await.unwrap();
    state.fail(RegisterKind::Input, 50, MockFailure::Exception);
    let catalog = RegisterCatalog::from_specs([
        RegisterSpec::new(1, 4, RegisterKind::Holding),
        RegisterSpec::new(50, 2, RegisterKind::Input),
    ])
    .unwrap();
    let sink = RecordingSink::new();
    let governor = Governor::new(link, Arc::new(catalog), sink.clone());

    governor.start().await.unwrap();
    advance(5100).await;

    assert_eq!(governor.state(), EngineState::Monitoring);
    assert_eq!(governor.consecutive_errors(), 0);
    assert_eq!(sink.latest_calls(), 6);
    let latest = sink.get_latest().await.unwrap().unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest.readings[0].kind, RegisterKind::Holding);

    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sink_failures_do_not_stop_polling() {
    let (link, state) = mock_link(device(1));
    state.set_holding(1, &[10, 20, 30, 40]);
    link.connect().await.unwrap();
    let sink = Arc::new(BrokenSink::default());
    let governor = Governor::new(link, holding_catalog(), sink.clone());

    governor.start().await.unwrap();
    advance(2100).await;

    assert_eq!(governor.state(), EngineState::Monitoring);
    assert_eq!(governor.consecutive_errors(), 0);
    assert_eq!(governor.status().cycles, 3);
    assert_eq!(state.read_calls(), 3);
    // both writes attempted every cycle
    assert_eq!(sink.writes.load(Ordering::SeqCst), 6);

    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_fault_resets_counter() {
    let (governor, state, sink) = connected_governor().await;
    state.fail_all(Some(MockFailure::Exception));
    governor.start().await.unwrap();
    assert_eq!(governor.join().await.unwrap(), EngineState::Faulted);

    state.fail_all(None);
    governor.start().await.unwrap();
    assert_eq!(governor.consecutive_errors(), 0);
    advance(100).await;

    assert_eq!(governor.state(), EngineState::Monitoring);
    assert_eq!(sink.latest_calls(), 1);
    governor.stop().await;
    assert_eq!(governor.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_clear_fault_returns_to_idle() {
    let (governor, state, _sink) = connected_governor().await;
    state.fail_all(Some(MockFailure::Exception));
    governor.start().await.unwrap();
    governor.join().await.unwrap();

    // stop keeps the fault
    governor.stop().await;
    assert_eq!(governor.state(), EngineState::Faulted);

    governor.clear_fault().await;
    assert_eq!(governor.state(), EngineState::Idle);
    assert_eq!(governor.consecutive_errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_link_reconnects_before_polling() {
    let (link, state) = mock_link(device(1));
    state.set_holding(1, &[10, 20, 30, 40]);
    let sink = RecordingSink::new();
    let governor = Governor::new(link.clone(), holding_catalog(), sink.clone());

    governor.start().await.unwrap();
    advance(100).await;

    assert!(link.is_connected());
    assert_eq!(state.connect_calls(), 1);
    assert_eq!(sink.latest_calls(), 1);
    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_recovers() {
    let (governor, state, sink) = connected_governor().await;

    governor.start().await.unwrap();
    advance(100).await;
    assert_eq!(sink.latest_calls(), 1);

    // t=1: read finds the session closed, empty cycle
    state.drop_session();
    advance(1000).await;
    assert_eq!(sink.latest_calls(), 1);
    assert_eq!(governor.consecutive_errors(), 1);

    // t=2: reconnect, then poll right away
    advance(1000).await;
    assert_eq!(state.connect_calls(), 2);
    assert_eq!(sink.latest_calls(), 2);
    assert_eq!(governor.consecutive_errors(), 0);

    governor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnects_trip_breaker() {
    let (link, state) = mock_link(device(1));
    state.refuse_connect(true);
    let sink = RecordingSink::new();
    let governor = Governor::new(link.clone(), holding_catalog(), sink.clone());

    governor.start().await.unwrap();
    let final_state = governor.join().await.unwrap();

    assert_eq!(final_state, EngineState::Faulted);
    // retries + 1 attempts per reconnect
    assert_eq!(state.connect_calls(), 2 * CIRCUIT_BREAKER_THRESHOLD as usize);
    assert_eq!(state.read_calls(), 0);
    assert_eq!(sink.latest_calls(), 0);
    assert!(!link.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_configured_backoff_spaces_reconnects() {
    let (link, state) = mock_link(device(1));
    state.refuse_connect(true);
    let config = ReconnectConfig {
        initial_delay: Some(1.0),
        max_delay: Some(4.0),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    let policy = ReconnectPolicy::from_config(&config, link.config().poll_interval());
    let governor =
        Governor::with_reconnect_policy(link, holding_catalog(), RecordingSink::new(), policy);

    // reconnects at t=0, 1, 3, 7 and 11; two connect attempts each
    governor.start().await.unwrap();
    advance(2500).await;
    assert_eq!(state.connect_calls(), 4);
    advance(1000).await;
    assert_eq!(state.connect_calls(), 6);
    advance(3000).await;
    assert_eq!(state.connect_calls(), 6);

    assert_eq!(governor.join().await.unwrap(), EngineState::Faulted);
    assert_eq!(state.connect_calls(), 2 * CIRCUIT_BREAKER_THRESHOLD as usize);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_sleep_ends_emission() {
    let (governor, _state, sink) = connected_governor().await;

    governor.start().await.unwrap();
    advance(100).await;
    assert!(governor.is_running().await);

    governor.stop().await;
    assert_eq!(governor.state(), EngineState::Idle);
    assert!(!governor.is_running().await);

    advance(5000).await;
    assert_eq!(sink.latest_calls(), 1);

    // second stop is a no-op
    governor.stop().await;
    assert_eq!(governor.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_hung_cycle() {
    let (governor, state, sink) = connected_governor().await;
    state.set_latency(Some(Duration::from_secs(60)));

    governor.start().await.unwrap();
    advance(100).await;
    governor.stop().await;

    assert_eq!(governor.state(), EngineState::Idle);
    assert_eq!(sink.latest_calls(), 0);

    // the abandoned read took its session with it
    assert_eq!(state.abort_calls(), 1);
    assert!(!governor.link().is_connected());
    assert_eq!(governor.link().pending_requests(), 0);

    state.set_latency(None);
    governor.link().connect().await.unwrap();
    let values = governor
        .link()
        .read_block(1, 4, RegisterKind::Holding)
        .await
        .unwrap();
    assert_eq!(values, RegisterValues::Words(vec![10, 20, 30, 40]));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_governor_ends_loop() {
    let (governor, state, sink) = connected_governor().await;

    governor.start().await.unwrap();
    advance(100).await;
    assert_eq!(sink.latest_calls(), 1);

    drop(governor);
    advance(5000).await;
    assert_eq!(sink.latest_calls(), 1);
    assert_eq!(state.read_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_fails() {
    let (governor, _state, _sink) = connected_governor().await;

    governor.start().await.unwrap();
    let err = governor.start().await.unwrap_err();
    assert_eq!(err, PollSrvError::AlreadyRunning);

    governor.stop().await;
    governor.start().await.unwrap();
    governor.stop().await;
}

#[tokio::test]
async fn test_join_without_loop_fails() {
    let (link, _state) = mock_link(device(1));
    let governor = Governor::new(link, holding_catalog(), RecordingSink::new());

    assert_eq!(governor.join().await.unwrap_err(), PollSrvError::NotRunning);
    assert_eq!(governor.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_observable() {
    let (governor, state, _sink) = connected_governor().await;
    let mut rx = governor.subscribe_state();
    state.fail_all(Some(MockFailure::Exception));

    governor.start().await.unwrap();
    let faulted = rx
        .wait_for(|s| *s == EngineState::Faulted)
        .await
        .map(|s| *s)
        .unwrap();
    assert_eq!(faulted, EngineState::Faulted);
}

#[tokio::test(start_paused = true)]
async fn test_governor_accessors() {
    let (link, _state) = mock_link(device(1));
    let governor = Governor::new(link.clone(), holding_catalog(), RecordingSink::new());

    assert!(Arc::ptr_eq(governor.link(), &link));
    assert_eq!(governor.catalog().len(), 1);
    assert_eq!(governor.sink().name(), "recording");
}
