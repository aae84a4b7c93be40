//! Time sources.
//!
//! The verifier needs wall-clock seconds (token `exp`/`nbf`), the rate
//! limiter needs a monotonic instant. Both come from the same [`Clock`] so
//! tests can drive them together with a [`ManualClock`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic now, used for window arithmetic.
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch, used for token lifetimes.
    fn unix_seconds(&self) -> u64;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle
/// and hand another to the component under test.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vibes_core::{Clock, ManualClock};
///
/// let clock = ManualClock::at_unix(1_000);
/// let start = clock.now();
/// clock.advance(Duration::from_secs(60));
///
/// assert_eq!(clock.now() - start, Duration::from_secs(60));
/// assert_eq!(clock.unix_seconds(), 1_060);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    origin_unix: u64,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Starts a manual clock at the given Unix timestamp.
    #[must_use]
    pub fn at_unix(seconds: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_unix: seconds,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_unix(SystemClock.unix_seconds())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn unix_seconds(&self) -> u64 {
        self.origin_unix + self.offset.lock().as_secs()
    }
}
