//! Failed-attempt rate limiting.
//!
//! A fixed-window counter per client key (the client IP). Once a client
//! reaches `max_failures` failures inside one window it is blocked until the
//! window ends. Windows are dropped by [`RateLimiter::evict_expired`], which
//! `main` runs periodically.
//!
//! State is per process: several instances behind a load balancer each keep
//! their own counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Time source, injectable for tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    failures: u32,
}

pub struct RateLimiter {
    max_failures: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self::with_clock(max_failures, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_failures: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_failures,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        // A panic while holding the lock leaves the map consistent.
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(&self, window: &Window, now: Instant) -> bool {
        now.duration_since(window.started) < self.window
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.windows()
            .get(key)
            .is_some_and(|w| self.is_live(w, now) && w.failures >= self.max_failures)
    }

    /// Count one failure. Returns `true` if the client is now blocked.
    pub fn record_failure(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows();

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            failures: 0,
        });
        if !self.is_live(window, now) {
            *window = Window {
                started: now,
                failures: 0,
            };
        }
        window.failures += 1;

        window.failures >= self.max_failures
    }

    /// Forget a client's failures, e.g. after a successful attempt.
    pub fn reset(&self, key: &str) {
        self.windows().remove(key);
    }

    /// Drop every window that has ended. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, w| self.is_live(w, now));
        before - windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows().len()
    }
}
