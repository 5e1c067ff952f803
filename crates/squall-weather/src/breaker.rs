//! Failure-windowed circuit breaker.
//!
//! Closed until `failure_threshold` failures land within `window_seconds`,
//! then open for `open_seconds`. There is no half-open probe: once
//! `opened_until` passes, the next call is attempted normally and its own
//! outcome decides whether the breaker trips again.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use squall_core::{BreakerConfig, Clock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window_seconds: f64,
    pub open_seconds: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for BreakerSettings {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            window_seconds: config.window_seconds as f64,
            open_seconds: config.open_seconds as f64,
        }
    }
}

#[derive(Debug, Default)]
struct CircuitState {
    failure_timestamps: VecDeque<f64>,
    /// 0.0 while closed
    opened_until: f64,
}

impl CircuitState {
    fn purge(&mut self, now: f64, window_seconds: f64) {
        while let Some(&oldest) = self.failure_timestamps.front() {
            if now - oldest <= window_seconds {
                break;
            }
            self.failure_timestamps.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: Mutex<CircuitState>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            state: Mutex::new(CircuitState::default()),
            clock,
        }
    }

    /// True iff the current time has reached `opened_until`.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        now >= self.state.lock().opened_until
    }

    pub fn is_open(&self) -> bool {
        !self.allow()
    }

    /// Record a terminal failure. Returns true when this failure tripped the breaker.
    ///
    /// Failures reported while already open are dropped: they neither extend
    /// `opened_until` nor count toward the next burst.
    pub fn record_failure(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if now < state.opened_until {
            return false;
        }

        state.failure_timestamps.push_back(now);
        state.purge(now, self.settings.window_seconds);

        if state.failure_timestamps.len() >= self.settings.failure_threshold as usize {
            state.opened_until = now + self.settings.open_seconds;
            state.failure_timestamps.clear();
            tracing::warn!(
                open_seconds = self.settings.open_seconds,
                "Circuit breaker opened after {} failures within {}s",
                self.settings.failure_threshold,
                self.settings.window_seconds
            );
            return true;
        }

        tracing::debug!(
            failures = state.failure_timestamps.len(),
            threshold = self.settings.failure_threshold,
            "Upstream failure recorded"
        );
        false
    }

    /// Reset the failure burst. Does not close a breaker that is already open.
    pub fn record_success(&self) {
        self.state.lock().failure_timestamps.clear();
    }

    /// Failures currently inside the window.
    pub fn failure_count(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.purge(now, self.settings.window_seconds);
        state.failure_timestamps.len()
    }

    pub fn opened_until(&self) -> f64 {
        self.state.lock().opened_until
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }
}
