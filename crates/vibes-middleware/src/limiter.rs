//! Fixed-window admission control.
//!
//! Each partition key owns a window holding its remaining permits. The
//! first call for a key, or the first call after its window has elapsed,
//! starts a fresh window with the full budget. A call is admitted when a
//! permit remains before the decrement.
//!
//! Windows are not aligned across keys, and a client may spend its whole
//! budget at the end of one window and again at the start of the next.
//!
//! Updates go through the `DashMap` entry lock, so concurrent calls for the
//! same key never lose a decrement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use vibes_core::{Clock, SystemClock};

/// Default permits per window.
pub const DEFAULT_PERMIT_LIMIT: u64 = 200;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    remaining: u64,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed.
    Admitted {
        /// Permits left in the current window.
        remaining: u64,
    },
    /// The budget is spent.
    Rejected {
        /// Time until the current window ends.
        retry_after: Duration,
    },
}

impl Admission {
    /// Returns `true` for [`Admission::Admitted`].
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// A fixed-window counter keyed by partition.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use vibes_core::ManualClock;
/// use vibes_middleware::FixedWindowLimiter;
///
/// let clock = ManualClock::default();
/// let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60))
///     .with_clock(Arc::new(clock.clone()));
///
/// assert!(limiter.try_admit("10.0.0.1"));
/// assert!(limiter.try_admit("10.0.0.1"));
/// assert!(!limiter.try_admit("10.0.0.1"));
///
/// clock.advance(Duration::from_secs(60));
/// assert!(limiter.try_admit("10.0.0.1"));
/// ```
#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    permit_limit: u64,
    window: Duration,
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PERMIT_LIMIT, DEFAULT_WINDOW)
    }
}

impl FixedWindowLimiter {
    /// Creates a limiter backed by the system clock.
    pub fn new(permit_limit: u64, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            clock: Arc::new(SystemClock),
            permit_limit,
            window,
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Permits granted per window.
    pub const fn permit_limit(&self) -> u64 {
        self.permit_limit
    }

    /// Window length.
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Admits or rejects one call for `key`.
    pub fn try_admit(&self, key: &str) -> bool {
        self.check(key).is_admitted()
    }

    /// Admits or rejects one call for `key`, reporting the window state.
    pub fn check(&self, key: &str) -> Admission {
        let now = self.clock.now();
        let fresh = Window {
            started: now,
            remaining: self.permit_limit,
        };

        let mut entry = self.windows.entry(key.to_owned()).or_insert(fresh);
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = fresh;
        }

        if entry.remaining > 0 {
            entry.remaining -= 1;
            Admission::Admitted {
                remaining: entry.remaining,
            }
        } else {
            Admission::Rejected {
                retry_after: self
                    .window
                    .saturating_sub(now.saturating_duration_since(entry.started)),
            }
        }
    }

    /// Drops windows that have elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of live windows.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
