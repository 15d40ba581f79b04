//! Reliability governor
//!
//! Runs the acquisition cycle every poll interval on one spawned task.
//! Failed cycles and failed reconnects count toward a circuit breaker; at
//! `CIRCUIT_BREAKER_THRESHOLD` consecutive failures the loop ends in
//! `Faulted` and stays there until `start()` or `clear_fault()`.
//!
//! Cancellation is observed at the top of every iteration, during the sleep,
//! during a reconnect and during an in-flight cycle. A cancelled cycle emits
//! nothing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::MonotonicClock;
use super::cycle::run_cycle;
use super::reconnect::{ReconnectHelper, ReconnectPolicy};
use crate::core::catalog::RegisterCatalog;
use crate::core::types::{Batch, EngineState};
use crate::error::{PollSrvError, Result};
use crate::link::DeviceLink;
use crate::storage::SnapshotSink;

/// Consecutive failures that trip the circuit breaker
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Point-in-time governor counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorStatus {
    pub state: EngineState,
    pub consecutive_errors: u32,
    pub cycles: u64,
    pub batches_emitted: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

struct Shared {
    link: Arc<DeviceLink>,
    catalog: Arc<RegisterCatalog>,
    sink: Arc<dyn SnapshotSink>,
    interval: Duration,
    reconnect_policy: ReconnectPolicy,
    clock: MonotonicClock,
    state_tx: watch::Sender<EngineState>,
    consecutive_errors: AtomicU32,
    cycles: AtomicU64,
    batches_emitted: AtomicU64,
    last_batch_at: SyncMutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn state(&self) -> EngineState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: EngineState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Engine state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Loop-internal transition; never overrides a pending stop
    fn transition(&self, state: EngineState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state || *current == EngineState::Stopping {
                return false;
            }
            *current = state;
            true
        });
    }

    fn record_failure(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    async fn emit(&self, batch: Batch) {
        if let Err(e) = self.sink.store_latest(&batch).await {
            error!("Sink {} failed to store latest batch: {:#}", self.sink.name(), e);
        }
        if let Err(e) = self.sink.append_history(&batch).await {
            error!("Sink {} failed to append history: {:#}", self.sink.name(), e);
        }
        self.batches_emitted.fetch_add(1, Ordering::AcqRel);
        *self.last_batch_at.lock() = Some(batch.timestamp);
        debug!("Stored {} register readings", batch.len());
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<EngineState>,
}

/// Owns the polling loop for one link and catalog
pub struct Governor {
    shared: Arc<Shared>,
    task: Mutex<Option<RunningLoop>>,
}

impl Governor {
    /// Governor with a fixed reconnect delay of one poll interval
    pub fn new(
        link: Arc<DeviceLink>,
        catalog: Arc<RegisterCatalog>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Self {
        let interval = link.config().poll_interval();
        Self::with_reconnect_policy(link, catalog, sink, ReconnectPolicy::fixed(interval))
    }

    pub fn with_reconnect_policy(
        link: Arc<DeviceLink>,
        catalog: Arc<RegisterCatalog>,
        sink: Arc<dyn SnapshotSink>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        let interval = link.config().poll_interval();
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            shared: Arc::new(Shared {
                link,
                catalog,
                sink,
                interval,
                reconnect_policy,
                clock: MonotonicClock::new(),
                state_tx,
                consecutive_errors: AtomicU32::new(0),
                cycles: AtomicU64::new(0),
                batches_emitted: AtomicU64::new(0),
                last_batch_at: SyncMutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.shared.link
    }

    pub fn catalog(&self) -> &Arc<RegisterCatalog> {
        &self.shared.catalog
    }

    pub fn sink(&self) -> &Arc<dyn SnapshotSink> {
        &self.shared.sink
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state_tx.subscribe()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.shared.consecutive_errors.load(Ordering::Acquire)
    }

    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            state: self.state(),
            consecutive_errors: self.consecutive_errors(),
            cycles: self.shared.cycles.load(Ordering::Acquire),
            batches_emitted: self.shared.batches_emitted.load(Ordering::Acquire),
            last_batch_at: *self.shared.last_batch_at.lock(),
        }
    }

    /// Whether the loop task is alive and not faulted
    pub async fn is_running(&self) -> bool {
        let task = self.task.lock().await;
        is_live(task.as_ref(), self.state())
    }

    /// Spawn the polling loop
    ///
    /// Fails with `AlreadyRunning` while a loop is active. Starting from
    /// `Faulted` resets the failure counter.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if is_live(task.as_ref(), self.state()) {
            return Err(PollSrvError::AlreadyRunning);
        }
        if let Some(finished) = task.take() {
            reap(finished).await;
        }

        self.shared.consecutive_errors.store(0, Ordering::Release);
        self.shared.set_state(EngineState::Monitoring);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.shared.clone(), cancel.clone()));
        *task = Some(RunningLoop { cancel, handle });

        info!(
            "Starting continuous monitoring (interval: {:?}, {} register groups)",
            self.shared.interval,
            self.shared.catalog.len()
        );
        Ok(())
    }

    /// Cancel the loop and wait for it; no-op when nothing runs
    ///
    /// A faulted governor stays faulted.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(running) = task.take() else {
            return;
        };

        self.shared.state_tx.send_if_modified(|current| {
            if current.is_active() {
                *current = EngineState::Stopping;
                true
            } else {
                false
            }
        });
        running.cancel.cancel();
        let final_state = reap(running).await;
        info!("Monitoring stopped ({})", final_state);
    }

    /// Wait for the loop task to end and return its final state
    pub async fn join(&self) -> Result<EngineState> {
        let mut rx = {
            let task = self.task.lock().await;
            if task.is_none() {
                return Err(PollSrvError::NotRunning);
            }
            self.subscribe_state()
        };

        let state = *rx
            .wait_for(|state| !state.is_active())
            .await
            .map_err(|_| PollSrvError::internal("engine state channel closed"))?;
        Ok(state)
    }

    /// Explicit restart of a faulted governor back to `Idle`
    pub async fn clear_fault(&self) {
        let mut task = self.task.lock().await;
        if self.state() != EngineState::Faulted {
            return;
        }
        if let Some(finished) = task.take() {
            reap(finished).await;
        }
        self.shared.consecutive_errors.store(0, Ordering::Release);
        self.shared.set_state(EngineState::Idle);
        info!("Circuit breaker reset");
    }
}

impl Drop for Governor {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

fn is_live(task: Option<&RunningLoop>, state: EngineState) -> bool {
    match task {
        Some(running) => !running.handle.is_finished() && state != EngineState::Faulted,
        None => false,
    }
}

async fn reap(running: RunningLoop) -> EngineState {
    match running.handle.await {
        Ok(state) => state,
        Err(e) => {
            error!("Monitoring task ended abnormally: {}", e);
            EngineState::Idle
        },
    }
}

/// Sleep for `delay`; true when cancelled first
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

fn trip(shared: &Shared, errors: u32) -> EngineState {
    error!(
        "Circuit breaker open after {} consecutive errors, stopping monitor",
        errors
    );
    shared.set_state(EngineState::Faulted);
    EngineState::Faulted
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) -> EngineState {
    let mut reconnect = ReconnectHelper::new(shared.reconnect_policy.clone());

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if !shared.link.is_connected() {
            shared.transition(EngineState::Connecting);
            warn!("Connection lost, attempting to reconnect...");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    // Do not leave a half-open session behind
                    shared.link.disconnect().await;
                    break;
                },
                outcome = shared.link.connect() => outcome,
            };

            match outcome {
                Ok(()) => {
                    reconnect.mark_connected();
                    shared.transition(EngineState::Monitoring);
                    continue;
                },
                Err(e) => {
                    let errors = shared.record_failure();
                    warn!("Reconnect failed (consecutive errors: {}): {}", errors, e);
                    if errors >= CIRCUIT_BREAKER_THRESHOLD {
                        return trip(&shared, errors);
                    }
                    let delay = reconnect.mark_failed();
                    if sleep_or_cancel(delay, &cancel).await {
                        break;
                    }
                    continue;
                },
            }
        }

        shared.transition(EngineState::Monitoring);
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = run_cycle(&shared.link, &shared.catalog, &shared.clock) => batch,
        };
        shared.cycles.fetch_add(1, Ordering::AcqRel);

        if batch.is_empty() {
            let errors = shared.record_failure();
            warn!("No data received (consecutive errors: {})", errors);
            if errors >= CIRCUIT_BREAKER_THRESHOLD {
                return trip(&shared, errors);
            }
        } else {
            shared.consecutive_errors.store(0, Ordering::Release);
            shared.emit(batch).await;
        }

        if sleep_or_cancel(shared.interval, &cancel).await {
            break;
        }
    }

    info!("Monitor task cancelled");
    shared.set_state(EngineState::Idle);
    EngineState::Idle
}
