use time::OffsetDateTime;

use crate::utils::truncate_to_seconds;

/// Source of the current time.
///
/// The KDC samples the clock exactly once per request and reuses that value for every freshness check
/// performed while the request is processed.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock of the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        truncate_to_seconds(OffsetDateTime::now_utc())
    }
}

/// A clock frozen at a given instant.
///
/// Useful for replaying captured requests and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        truncate_to_seconds(self.0)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> OffsetDateTime {
        (**self).now()
    }
}
