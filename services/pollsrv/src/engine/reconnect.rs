//! Reconnection pacing
//!
//! Computes how long the governor waits after a failed reconnect. The
//! `reconnect` config section selects a fixed delay (the default, one poll
//! interval) or exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::core::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for the computed delay
    pub max_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Randomize the delay by ±25%
    pub jitter: bool,
}

impl ReconnectPolicy {
    /// Same delay after every failure
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Policy for a validated config section; unset delays fall back to the poll interval
    pub fn from_config(config: &ReconnectConfig, poll_interval: Duration) -> Self {
        let initial_delay = seconds(config.initial_delay).unwrap_or(poll_interval);
        let max_delay = seconds(config.max_delay)
            .unwrap_or(initial_delay)
            .max(initial_delay);
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

fn seconds(value: Option<f64>) -> Option<Duration> {
    value.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Tracks consecutive failed reconnects and derives the next delay
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
        }
    }

    pub fn mark_connected(&mut self) {
        if self.current_attempt > 0 {
            debug!("Reconnected after {} failed attempts", self.current_attempt);
        }
        self.current_attempt = 0;
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn mark_failed(&mut self) -> Duration {
        self.current_attempt = self.current_attempt.saturating_add(1);
        self.calculate_next_delay()
    }

    fn calculate_next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let multiplier = self.policy.backoff_multiplier.max(1.0);

        // delay = initial_delay * (multiplier ^ attempt), capped
        let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let scaled = self.policy.initial_delay.as_secs_f64() * factor;
        let mut delay = Duration::try_from_secs_f64(scaled).unwrap_or(self.policy.max_delay);
        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        if self.policy.jitter && !delay.is_zero() {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            delay = Duration::from_millis(delay_ms as u64);
        }

        delay
    }
}
