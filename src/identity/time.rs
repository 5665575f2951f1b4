use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Clock used for every expiry and timestamp decision.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

    pub fn set(&self, t: DateTime<Utc>) { *self.now.lock() = t; }

    pub fn advance(&self, by: Duration) {
        let mut g = self.now.lock();
        *g += by;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> { *self.now.lock() }
}
