//! Device Link
//!
//! Owns the single driver session for one device. Requests are serialized
//! through an async mutex, each attempt is bounded by the configured timeout
//! and transport failures are retried `retries` times. Device exceptions are
//! final on the first answer.
//!
//! An attempt that is abandoned before its answer arrives (timeout, or the
//! caller's future dropped) aborts the session, since the late answer would
//! otherwise be read as the reply to the next request. A retry after a
//! timeout reopens the session first. Apart from that the link never
//! reconnects on its own.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::driver::{DriverResult, ModbusDriver};
use super::tcp::TcpDriver;
use crate::core::catalog::{check_address_span, validate_read, RegisterKind, MAX_WRITE_REGISTERS};
use crate::core::config::DeviceConfig;
use crate::core::types::RegisterValues;
use crate::error::{DriverError, PollSrvError, Result};

enum Request<'a> {
    Read {
        kind: RegisterKind,
        address: u16,
        count: u16,
    },
    WriteSingle {
        address: u16,
        value: u16,
    },
    WriteMultiple {
        address: u16,
        values: &'a [u16],
    },
}

impl fmt::Display for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Read {
                kind,
                address,
                count,
            } => write!(f, "read {} {}x{}", kind, address, count),
            Request::WriteSingle { address, .. } => write!(f, "write {}", address),
            Request::WriteMultiple { address, values } => {
                write!(f, "write {}x{}", address, values.len())
            },
        }
    }
}

enum Response {
    Words(Vec<u16>),
    Bits(Vec<bool>),
    Written,
}

async fn dispatch(driver: &mut dyn ModbusDriver, request: &Request<'_>) -> DriverResult<Response> {
    match *request {
        Request::Read {
            kind,
            address,
            count,
        } => match kind {
            RegisterKind::Holding => driver
                .read_holding_registers(address, count)
                .await
                .map(Response::Words),
            RegisterKind::Input => driver
                .read_input_registers(address, count)
                .await
                .map(Response::Words),
            RegisterKind::Coils => driver.read_coils(address, count).await.map(Response::Bits),
            RegisterKind::DiscreteInputs => driver
                .read_discrete_inputs(address, count)
                .await
                .map(Response::Bits),
        },
        Request::WriteSingle { address, value } => driver
            .write_single_register(address, value)
            .await
            .map(|_| Response::Written),
        Request::WriteMultiple { address, values } => driver
            .write_multiple_registers(address, values)
            .await
            .map(|_| Response::Written),
    }
}

/// Counts one request from issue to completion, queued time included
struct Pending<'a>(&'a AtomicUsize);

impl<'a> Pending<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive use of the driver for one request attempt
///
/// Dropped while still armed, the request never got its answer and the
/// session is aborted.
struct Attempt<'a> {
    driver: MutexGuard<'a, Box<dyn ModbusDriver>>,
    connected: &'a AtomicBool,
    armed: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.driver.abort();
        }
        self.connected.store(self.driver.is_connected(), Ordering::Release);
    }
}

/// Single logical connection to one device
pub struct DeviceLink {
    config: DeviceConfig,
    driver: Mutex<Box<dyn ModbusDriver>>,
    /// Refreshed after every driver call; read without waiting on the mutex
    connected: AtomicBool,
    pending: AtomicUsize,
}

impl DeviceLink {
    pub fn new(config: DeviceConfig, driver: Box<dyn ModbusDriver>) -> Self {
        Self {
            config,
            driver: Mutex::new(driver),
            connected: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        }
    }

    /// Link over Modbus TCP
    pub fn tcp(config: DeviceConfig) -> Self {
        let driver = TcpDriver::new(config.host.clone(), config.port, config.device_id);
        Self::new(config, Box::new(driver))
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn attempts(&self) -> u32 {
        self.config.retries.saturating_add(1)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Reads and writes issued and not yet finished, including those waiting
    /// for the session
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Open the session; no-op when already connected
    pub async fn connect(&self) -> Result<()> {
        let mut driver = self.driver.lock().await;
        if driver.is_connected() {
            self.connected.store(true, Ordering::Release);
            return Ok(());
        }

        let endpoint = self.config.endpoint();
        let mut last_error = String::new();
        for attempt in 1..=self.attempts() {
            debug!(
                "Connecting to {} (attempt {}/{})",
                endpoint,
                attempt,
                self.attempts()
            );
            match tokio::time::timeout(self.timeout(), driver.connect()).await {
                Ok(Ok(())) => {
                    self.connected.store(true, Ordering::Release);
                    info!("Connected to Modbus device at {}", endpoint);
                    return Ok(());
                },
                Ok(Err(e)) => {
                    warn!("Connect attempt {} to {} failed: {}", attempt, endpoint, e);
                    last_error = e.to_string();
                },
                Err(_) => {
                    warn!(
                        "Connect attempt {} to {} timed out after {:?}",
                        attempt,
                        endpoint,
                        self.timeout()
                    );
                    last_error = format!("timed out after {:?}", self.timeout());
                },
            }
        }

        self.connected.store(false, Ordering::Release);
        Err(PollSrvError::connection(format!("{}: {}", endpoint, last_error)))
    }

    /// Release the session; always succeeds
    pub async fn disconnect(&self) {
        let mut driver = self.driver.lock().await;
        match tokio::time::timeout(self.timeout(), driver.disconnect()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!("Disconnect from {} failed: {}", self.config.endpoint(), e),
            Err(_) => warn!("Disconnect from {} timed out", self.config.endpoint()),
        }
        self.connected.store(false, Ordering::Release);
        info!("Disconnected from Modbus device at {}", self.config.endpoint());
    }

    /// Read one register group; the result always holds exactly `count` values
    pub async fn read_block(
        &self,
        address: u16,
        count: u16,
        kind: RegisterKind,
    ) -> Result<RegisterValues> {
        validate_read(address, count, kind)?;

        let values = match self
            .execute(Request::Read {
                kind,
                address,
                count,
            })
            .await?
        {
            Response::Words(words) => RegisterValues::Words(words),
            Response::Bits(bits) => RegisterValues::Bits(bits),
            Response::Written => {
                return Err(PollSrvError::internal("write response to a read request"))
            },
        };

        if values.len() != usize::from(count) {
            return Err(PollSrvError::protocol(format!(
                "read {} {}: expected {} values, got {}",
                kind,
                address,
                count,
                values.len()
            )));
        }
        Ok(values)
    }

    /// Write one holding register
    pub async fn write_single(&self, address: u16, value: i64) -> Result<()> {
        let value = to_word(value)?;
        self.execute(Request::WriteSingle { address, value })
            .await
            .map(|_| ())
    }

    /// Write consecutive holding registers
    pub async fn write_block(&self, address: u16, values: &[i64]) -> Result<()> {
        if values.is_empty() || values.len() > usize::from(MAX_WRITE_REGISTERS) {
            return Err(PollSrvError::validation(format!(
                "value count {} out of range 1..={}",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        check_address_span(address, values.len() as u16)?;
        let words = values
            .iter()
            .map(|v| to_word(*v))
            .collect::<Result<Vec<u16>>>()?;

        self.execute(Request::WriteMultiple {
            address,
            values: &words,
        })
        .await
        .map(|_| ())
    }

    async fn execute(&self, request: Request<'_>) -> Result<Response> {
        let _pending = Pending::enter(&self.pending);
        let mut last_error = None;
        let mut reopen = false;

        for attempt in 1..=self.attempts() {
            let mut driver = self.driver.lock().await;
            if !driver.is_connected() {
                if !reopen {
                    self.connected.store(false, Ordering::Release);
                    return Err(PollSrvError::transport(format!(
                        "{}: device not connected",
                        request
                    )));
                }
                self.reopen(driver.as_mut(), &request).await?;
            }

            let mut current = Attempt {
                driver,
                connected: &self.connected,
                armed: true,
            };
            let outcome =
                tokio::time::timeout(self.timeout(), dispatch(current.driver.as_mut(), &request))
                    .await;
            current.armed = outcome.is_err();
            drop(current);

            match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(DriverError::Exception(msg))) => return Err(PollSrvError::protocol(msg)),
                Ok(Err(e)) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        request,
                        attempt,
                        self.attempts(),
                        e
                    );
                    last_error = Some(PollSrvError::transport(format!("{}: {}", request, e)));
                },
                Err(_) => {
                    warn!(
                        "{} timed out after {:?} (attempt {}/{})",
                        request,
                        self.timeout(),
                        attempt,
                        self.attempts()
                    );
                    last_error = Some(PollSrvError::transport(format!(
                        "{}: timed out after {:?}",
                        request,
                        self.timeout()
                    )));
                    reopen = true;
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| PollSrvError::transport(format!("{}: no attempt made", request))))
    }

    /// Fresh session for the retry of a timed-out request
    async fn reopen(&self, driver: &mut dyn ModbusDriver, request: &Request<'_>) -> Result<()> {
        debug!(
            "Reopening session to {} to retry {}",
            self.config.endpoint(),
            request
        );
        let outcome = tokio::time::timeout(self.timeout(), driver.connect()).await;
        self.connected.store(driver.is_connected(), Ordering::Release);
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PollSrvError::transport(format!(
                "{}: reopening session failed: {}",
                request, e
            ))),
            Err(_) => Err(PollSrvError::transport(format!(
                "{}: reopening session timed out after {:?}",
                request,
                self.timeout()
            ))),
        }
    }
}

fn to_word(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        PollSrvError::validation(format!("value {} out of range 0..=65535", value))
    })
}
