//! UTC wall clock used for every expiry computation.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `now` moved by `delta`.
///
/// `delta` is the result of a fallible constructor such as `Duration::try_hours`, so a
/// configured lifetime that chrono can't represent surfaces here instead of panicking.
///
/// # Errors
/// `InvalidArgument` naming `what` when `delta` is `None` or the result overflows.
pub fn shifted(now: DateTime<Utc>, delta: Option<Duration>, what: &str) -> Result<DateTime<Utc>> {
    delta
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::InvalidArgument(format!("{what} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::hours(25));
        assert_eq!(clock.now(), start + Duration::hours(25));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn shifted_rejects_unrepresentable_lifetimes() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(
            shifted(start, Duration::try_hours(2), "lifetime").unwrap(),
            start + Duration::hours(2)
        );
        assert_eq!(
            shifted(start, Duration::try_days(1).map(|d| -d), "cutoff").unwrap(),
            start - Duration::days(1)
        );
        assert!(matches!(
            shifted(start, Duration::try_hours(i64::MAX), "lifetime"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            shifted(start, Duration::try_days(100_000_000), "cutoff"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
