//! Fixed-window admission control.
//!
//! The counter resets at window boundaries rather than rolling, so a burst
//! straddling a boundary can admit up to 2x `limit` in a short interval.
//! That imprecision is kept on purpose.

use std::sync::Arc;

use parking_lot::Mutex;
use squall_core::{Clock, RateQuota};

#[derive(Debug, Default)]
struct RateWindow {
    /// `None` until the first call
    window_start: Option<f64>,
    count: u64,
}

/// Global (per route) fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u64,
    window_seconds: f64,
    window: Mutex<RateWindow>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u64, window_seconds: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window_seconds,
            window: Mutex::new(RateWindow::default()),
            clock,
        }
    }

    pub fn from_quota(quota: RateQuota, clock: Arc<dyn Clock>) -> Self {
        Self::new(quota.requests, quota.window_seconds as f64, clock)
    }

    /// Count this call and report whether it is within the quota.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut window = self.window.lock();

        let expired = match window.window_start {
            None => true,
            Some(start) => now - start >= self.window_seconds,
        };
        if expired {
            window.window_start = Some(now);
            window.count = 0;
        }

        window.count += 1;
        window.count <= self.limit
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}
