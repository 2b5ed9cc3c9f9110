//! Clock abstraction for deterministic time-dependent behaviour

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of "now" as a civil date-time.
///
/// Transaction timestamps are civil values without a zone; the wall clock
/// used for `detected_at` and metrics freshness follows the same convention
/// so the two are directly comparable.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// System wall clock in local civil time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually advanced clock for tests.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}
