use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Every component that reads "now" takes a `Clock` rather than calling
/// `Utc::now()` directly, so lifecycle transitions and backoff scheduling
/// are deterministically testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests. Starts at the time passed to `new` and only
/// moves when `set`/`advance` is called.
pub struct TestClock {
    inner: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { inner: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().expect("test clock mutex poisoned") = at;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("test clock mutex poisoned");
        *guard += delta;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("test clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = TestClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now(), start + chrono::Duration::days(1));
    }
}
