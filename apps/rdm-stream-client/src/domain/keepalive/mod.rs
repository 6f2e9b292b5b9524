//! Keepalive Monitor
//!
//! Tracks the deadline by which the server must show signs of life. The
//! deadline is `last reset + ping interval`; the interval starts at a
//! conservative default and is replaced by the server's `PingTimeout` once
//! the login refresh arrives.
//!
//! The monitor never looks at a clock itself: callers pass `now`. Whatever
//! drives the periodic check (see `infrastructure::rdm::heartbeat`) is
//! independent of this logic.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

/// Ping interval assumed before the server announces its own.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// No traffic arrived before the keepalive deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no ping from server within {interval:?} (silent for {silent_for:?})")]
pub struct KeepAliveExpired {
    /// Interval in force when the deadline passed.
    pub interval: Duration,
    /// Time since the last reset.
    pub silent_for: Duration,
}

#[derive(Debug)]
struct MonitorState {
    interval: Duration,
    last_reset: Option<Instant>,
    reported: bool,
}

/// Keepalive deadline shared between the message pump and the liveness tick.
#[derive(Debug)]
pub struct KeepAliveMonitor {
    state: Mutex<MonitorState>,
}

impl Default for KeepAliveMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL)
    }
}

impl KeepAliveMonitor {
    /// Create an unarmed monitor with the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                interval,
                last_reset: None,
                reported: false,
            }),
        }
    }

    /// Current ping interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Replace the ping interval (from the login refresh).
    ///
    /// Takes effect for the current deadline as well.
    pub fn set_interval(&self, interval: Duration) {
        self.state.lock().interval = interval;
    }

    /// Push the deadline out to `now + interval` and re-arm reporting.
    pub fn reset(&self, now: Instant) {
        let mut state = self.state.lock();
        state.last_reset = Some(now);
        state.reported = false;
    }

    /// Whether the monitor has been armed by a first reset.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.lock().last_reset.is_some()
    }

    /// Current deadline, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let state = self.state.lock();
        state.last_reset.map(|t| t + state.interval)
    }

    /// True when armed and `now` is strictly past the deadline.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now > deadline)
    }

    /// Report expiry once per reset.
    ///
    /// Returns `Some` the first time `now` is past the deadline and `None`
    /// on every later call until the next [`reset`](Self::reset).
    pub fn check(&self, now: Instant) -> Option<KeepAliveExpired> {
        let mut state = self.state.lock();
        let last_reset = state.last_reset?;
        if state.reported || now <= last_reset + state.interval {
            return None;
        }
        state.reported = true;
        Some(KeepAliveExpired {
            interval: state.interval,
            silent_for: now.saturating_duration_since(last_reset),
        })
    }
}
