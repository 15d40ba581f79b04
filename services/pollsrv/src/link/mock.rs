//! Scriptable in-memory driver
//!
//! Backs register tables with hash maps, counts every call and can inject
//! failures per register group. Tests keep an `Arc<MockState>` handle while
//! the driver itself is owned by a `DeviceLink`.
//!
//! Like a real TCP session, a request abandoned mid-flight leaves its answer
//! queued: the next request on the same session reads that stale answer,
//! fails and loses the session. `abort()` discards it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::driver::{DriverResult, ModbusDriver};
use crate::core::catalog::RegisterKind;
use crate::error::DriverError;

/// Injected failure for a read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Device exception response
    Exception,
    /// I/O error, session stays open
    Transport,
    /// I/O error and the session drops
    Disconnect,
    /// One value fewer than requested
    Short,
    /// Never answers
    Hang,
}

#[derive(Default)]
struct MockInner {
    connected: bool,
    /// A request started and never completed on this session
    in_flight: bool,
    refuse_connect: bool,
    words: HashMap<(RegisterKind, u16), u16>,
    bits: HashMap<(RegisterKind, u16), bool>,
    failures: HashMap<(RegisterKind, u16), MockFailure>,
    fail_all: Option<MockFailure>,
    latency: Option<Duration>,
}

impl MockInner {
    fn close(&mut self) {
        self.connected = false;
        self.in_flight = false;
    }
}

/// Shared handle for scripting and observing a `MockDriver`
#[derive(Default)]
pub struct MockState {
    inner: Mutex<MockInner>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    abort_calls: AtomicUsize,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MockState {
    pub fn set_holding(&self, address: u16, values: &[u16]) {
        self.set_words(RegisterKind::Holding, address, values);
    }

    pub fn set_input(&self, address: u16, values: &[u16]) {
        self.set_words(RegisterKind::Input, address, values);
    }

    pub fn set_coils(&self, address: u16, values: &[bool]) {
        self.set_bits(RegisterKind::Coils, address, values);
    }

    pub fn set_discrete_inputs(&self, address: u16, values: &[bool]) {
        self.set_bits(RegisterKind::DiscreteInputs, address, values);
    }

    fn set_words(&self, kind: RegisterKind, address: u16, values: &[u16]) {
        let mut inner = self.inner.lock();
        for (offset, value) in values.iter().enumerate() {
            inner
                .words
                .insert((kind, address.wrapping_add(offset as u16)), *value);
        }
    }

    fn set_bits(&self, kind: RegisterKind, address: u16, values: &[bool]) {
        let mut inner = self.inner.lock();
        for (offset, value) in values.iter().enumerate() {
            inner
                .bits
                .insert((kind, address.wrapping_add(offset as u16)), *value);
        }
    }

    /// Current holding register content (0 when never written)
    pub fn holding(&self, address: u16) -> u16 {
        self.inner
            .lock()
            .words
            .get(&(RegisterKind::Holding, address))
            .copied()
            .unwrap_or(0)
    }

    /// Fail requests starting at `address` for `kind`
    pub fn fail(&self, kind: RegisterKind, address: u16, failure: MockFailure) {
        self.inner.lock().failures.insert((kind, address), failure);
    }

    pub fn clear_failure(&self, kind: RegisterKind, address: u16) {
        self.inner.lock().failures.remove(&(kind, address));
    }

    /// Fail every read and write
    pub fn fail_all(&self, failure: Option<MockFailure>) {
        self.inner.lock().fail_all = failure;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.inner.lock().refuse_connect = refuse;
    }

    /// Delay applied to every read and write
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    /// Simulate the peer closing the session
    pub fn drop_session(&self) {
        self.inner.lock().close();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Reads plus writes
    pub fn io_calls(&self) -> usize {
        self.read_calls() + self.write_calls()
    }
}

/// In-memory `ModbusDriver`
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_state(Arc::new(MockState::default()))
    }

    pub fn with_state(state: Arc<MockState>) -> Self {
        Self { state }
    }

    /// Handle that stays valid after the driver is boxed into a link
    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }

    /// Common preamble for reads and writes: session check, latency, failures
    async fn begin(&self, kind: RegisterKind, address: u16) -> DriverResult<Option<MockFailure>> {
        let (latency, failure) = {
            let mut inner = self.state.inner.lock();
            if !inner.connected {
                return Err(DriverError::Transport("session closed".to_string()));
            }
            if inner.in_flight {
                inner.close();
                return Err(DriverError::Transport(
                    "response transaction id mismatch".to_string(),
                ));
            }
            inner.in_flight = true;
            let failure = inner
                .failures
                .get(&(kind, address))
                .copied()
                .or(inner.fail_all);
            (inner.latency, failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failure == Some(MockFailure::Hang) {
            std::future::pending::<()>().await;
        }

        let mut inner = self.state.inner.lock();
        inner.in_flight = false;
        match failure {
            Some(MockFailure::Exception) => Err(DriverError::Exception(format!(
                "illegal data address {}",
                address
            ))),
            Some(MockFailure::Transport) => {
                Err(DriverError::Transport("connection timed out".to_string()))
            },
            Some(MockFailure::Disconnect) => {
                inner.close();
                Err(DriverError::Transport("connection reset by peer".to_string()))
            },
            other => Ok(other),
        }
    }

    async fn read_words(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> DriverResult<Vec<u16>> {
        self.state.read_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.begin(kind, address).await?;
        let len = short_len(count, failure);
        let inner = self.state.inner.lock();
        Ok((0..len)
            .map(|i| {
                inner
                    .words
                    .get(&(kind, address.wrapping_add(i)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn read_bits(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> DriverResult<Vec<bool>> {
        self.state.read_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.begin(kind, address).await?;
        let len = short_len(count, failure);
        let inner = self.state.inner.lock();
        Ok((0..len)
            .map(|i| {
                inner
                    .bits
                    .get(&(kind, address.wrapping_add(i)))
                    .copied()
                    .unwrap_or(false)
            })
            .collect())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn short_len(count: u16, failure: Option<MockFailure>) -> u16 {
    match failure {
        Some(MockFailure::Short) => count.saturating_sub(1),
        _ => count,
    }
}

#[async_trait]
impl ModbusDriver for MockDriver {
    async fn connect(&mut self) -> DriverResult<()> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.state.inner.lock();
        if inner.refuse_connect {
            return Err(DriverError::Connect("connection refused".to_string()));
        }
        if !inner.connected {
            inner.connected = true;
            inner.in_flight = false;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.inner.lock().close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn abort(&mut self) {
        self.state.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.state.inner.lock().close();
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> DriverResult<Vec<u16>> {
        self.read_words(RegisterKind::Holding, address, count).await
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> DriverResult<Vec<u16>> {
        self.read_words(RegisterKind::Input, address, count).await
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> DriverResult<Vec<bool>> {
        self.read_bits(RegisterKind::Coils, address, count).await
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> DriverResult<Vec<bool>> {
        self.read_bits(RegisterKind::DiscreteInputs, address, count)
            .await
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> DriverResult<()> {
        self.state.write_calls.fetch_add(1, Ordering::SeqCst);
        self.begin(RegisterKind::Holding, address).await?;
        self.state.set_holding(address, &[value]);
        Ok(())
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> DriverResult<()> {
        self.state.write_calls.fetch_add(1, Ordering::SeqCst);
        self.begin(RegisterKind::Holding, address).await?;
        self.state.set_holding(address, values);
        Ok(())
    }
}
