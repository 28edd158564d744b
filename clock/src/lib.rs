//! A testable notion of time.
//!
//! Revision pinning, debounce coalescing and idle-TTL teardown all need "what time is it"
//! without hard-wiring `SystemTime::now()` into the middle of the cache core, where it would be
//! impossible to drive deterministically from tests. Everything that needs the wall clock takes
//! an `Arc<dyn TimeProvider>` instead.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::{fmt::Debug, time::Duration};

/// A point in time, represented as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    /// Construct from milliseconds since the Unix epoch.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Construct from nanoseconds since the Unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    /// Nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.0
    }

    /// This point in time plus `duration`.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        i64::try_from(duration.as_nanos())
            .ok()
            .and_then(|d| self.0.checked_add(d))
            .map(Self)
    }

    /// Duration elapsed between `earlier` and `self`, or `None` if `earlier` is in the future.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<Duration> {
        if self.0 < earlier.0 {
            return None;
        }
        Some(Duration::from_nanos((self.0 - earlier.0) as u64))
    }

    /// View as a [`chrono::DateTime<Utc>`].
    pub fn date_time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }
}

/// Anything that can report "now".
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by the OS clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Construct a new system-clock time provider.
    pub fn new() -> Self {
        Self {}
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from_timestamp_nanos(Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }
}

/// A [`TimeProvider`] that only advances when told to, for deterministic tests of debounce
/// coalescing, DEK rotation windows and idle-TTL teardown.
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<Time>,
}

impl MockProvider {
    /// Construct a mock clock starting at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, time: Time) {
        *self.now.lock() = time;
    }

    /// Advance the clock by `duration`, returning the new time.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.lock();
        *now = now.checked_add(duration).expect("mock clock overflow");
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances() {
        let mock = MockProvider::new(Time::from_timestamp_millis(0));
        assert_eq!(mock.now(), Time::from_timestamp_millis(0));
        let t = mock.inc(Duration::from_millis(100));
        assert_eq!(t, Time::from_timestamp_millis(100));
        assert_eq!(mock.now(), t);
    }

    #[test]
    fn duration_since_is_none_when_earlier_is_future() {
        let a = Time::from_timestamp_millis(0);
        let b = Time::from_timestamp_millis(100);
        assert_eq!(b.checked_duration_since(a), Some(Duration::from_millis(100)));
        assert_eq!(a.checked_duration_since(b), None);
    }
}
