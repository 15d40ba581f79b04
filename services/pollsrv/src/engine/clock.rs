use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Wall-clock UTC that never goes backwards for one instance
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    fn observe(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let ts = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(ts);
        ts
    }
}
