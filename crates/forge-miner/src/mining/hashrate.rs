//! Hash-rate tracking across PoW workers
//!
//! Workers report attempt counts per batch. The rate is the sum of samples
//! inside the window divided by `min(window, time since restart)`. Tip changes
//! do not touch the tracker; only an explicit [`HashRateTracker::restart`] does.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
}

/// Sliding-window attempt counter
pub struct HashRateTracker {
    window: Duration,
    inner: Mutex<Window>,
    total: AtomicU64,
}

impl HashRateTracker {
    /// Create a tracker averaging over `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            inner: Mutex::new(Window {
                started: Instant::now(),
                samples: VecDeque::new(),
            }),
            total: AtomicU64::new(0),
        }
    }

    /// Record `attempts` hashes computed just now
    pub fn record(&self, attempts: u64) {
        self.record_at(Instant::now(), attempts);
    }

    fn record_at(&self, at: Instant, attempts: u64) {
        if attempts == 0 {
            return;
        }
        self.total.fetch_add(attempts, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.samples.push_back((at, attempts));
        Self::prune(&mut inner, at, self.window);
    }

    fn prune(inner: &mut Window, now: Instant, window: Duration) {
        while let Some(&(at, _)) = inner.samples.front() {
            if now.saturating_duration_since(at) > window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attempts per second
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    fn rate_at(&self, now: Instant) -> f64 {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, now, self.window);

        let span = now.saturating_duration_since(inner.started).min(self.window);
        let secs = span.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        let attempts: u64 = inner.samples.iter().map(|&(_, n)| n).sum();
        attempts as f64 / secs
    }

    /// Drop all samples and restart the timer
    pub fn restart(&self) {
        let mut inner = self.inner.lock();
        inner.samples.clear();
        inner.started = Instant::now();
    }

    /// Attempts recorded since creation
    pub fn total_attempts(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
