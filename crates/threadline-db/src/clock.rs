//! Commit-time source for server timestamps.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Lets tests produce coarse,
/// colliding timestamps on purpose.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Hands out commit times that never go backwards, truncated to the
/// microsecond precision timestamps are stored with.
pub(crate) struct CommitClock {
    source: Box<dyn Clock>,
    last: Mutex<DateTime<Utc>>,
}

impl CommitClock {
    pub(crate) fn new(source: Box<dyn Clock>) -> Self {
        Self {
            source,
            last: Mutex::new(DateTime::<Utc>::default()),
        }
    }

    pub(crate) fn next(&self) -> DateTime<Utc> {
        let now = self.source.now().trunc_subsecs(6);
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now > *last {
            *last = now;
        }
        *last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_clock_never_goes_backwards() {
        let start = Utc::now();
        let manual = Arc::new(ManualClock::new(start));
        let clock = CommitClock::new(Box::new(manual.clone()));

        let first = clock.next();
        manual.set(start - Duration::seconds(30));
        let second = clock.next();
        assert_eq!(first, second);

        manual.set(start + Duration::seconds(1));
        assert!(clock.next() > second);
    }

    #[test]
    fn commit_clock_truncates_to_micros() {
        let clock = CommitClock::new(Box::new(SystemClock));
        let ts = clock.next();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }
}
