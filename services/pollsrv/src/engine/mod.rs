//! Polling engine: acquisition cycle, reconnect pacing and the governor loop

pub mod clock;
pub mod cycle;
pub mod governor;
pub mod reconnect;

pub use clock::MonotonicClock;
pub use cycle::run_cycle;
pub use governor::{Governor, GovernorStatus, CIRCUIT_BREAKER_THRESHOLD};
pub use reconnect::{ReconnectHelper, ReconnectPolicy};
