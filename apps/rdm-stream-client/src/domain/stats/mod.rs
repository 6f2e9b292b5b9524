//! Session Statistics
//!
//! Counters for the messages a session has seen and the completion rule
//! used for auto-exit.
//!
//! Counters only ever grow. They are written by the message pump and may be
//! read concurrently by the stats reporter, so they are plain atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Items requested by the subscription plan.
    pub requested: u64,
    /// Complete data refreshes received.
    pub refreshed: u64,
    /// Updates received.
    pub updated: u64,
    /// Data (non-login) status messages received.
    pub statused: u64,
    /// Statuses reporting `(Closed, Suspect)`: items the server rejected.
    pub closed_status: u64,
    /// Pings received (each answered with a Pong).
    pub pinged: u64,
}

impl Stats {
    /// Items that have been answered with a refresh or a rejection.
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.refreshed + self.closed_status
    }
}

/// Thread-safe session counters.
#[derive(Debug, Default)]
pub struct StatsCounter {
    requested: AtomicU64,
    requested_set: AtomicBool,
    refreshed: AtomicU64,
    updated: AtomicU64,
    statused: AtomicU64,
    closed_status: AtomicU64,
    pinged: AtomicU64,
}

impl StatsCounter {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add items to the requested total and mark it as set.
    pub fn add_requested(&self, count: u64) {
        self.requested.fetch_add(count, Ordering::SeqCst);
        self.requested_set.store(true, Ordering::SeqCst);
    }

    /// True once a subscription plan has recorded its item count.
    #[must_use]
    pub fn is_requested_set(&self) -> bool {
        self.requested_set.load(Ordering::SeqCst)
    }

    /// Count a complete data refresh.
    pub fn record_refresh(&self) {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
    }

    /// Count an update.
    pub fn record_update(&self) {
        self.updated.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a data status; `closed` marks a rejected item.
    pub fn record_status(&self, closed: bool) {
        self.statused.fetch_add(1, Ordering::SeqCst);
        if closed {
            self.closed_status.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Count a ping.
    pub fn record_ping(&self) {
        self.pinged.fetch_add(1, Ordering::SeqCst);
    }

    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> Stats {
        Stats {
            requested: self.requested.load(Ordering::SeqCst),
            refreshed: self.refreshed.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            statused: self.statused.load(Ordering::SeqCst),
            closed_status: self.closed_status.load(Ordering::SeqCst),
            pinged: self.pinged.load(Ordering::SeqCst),
        }
    }
}

/// Decides whether every requested item has been answered.
#[derive(Debug, Clone, Copy)]
pub struct CompletionTracker {
    auto_exit: bool,
}

impl CompletionTracker {
    /// Create a tracker; completion is only ever reported when `auto_exit` is set.
    #[must_use]
    pub const fn new(auto_exit: bool) -> Self {
        Self { auto_exit }
    }

    /// Whether auto-exit is armed.
    #[must_use]
    pub const fn auto_exit(&self) -> bool {
        self.auto_exit
    }

    /// `requested == refreshed + closed_status`, once `requested` is known.
    #[must_use]
    pub fn is_complete(&self, counter: &StatsCounter) -> bool {
        if !self.auto_exit || !counter.is_requested_set() {
            return false;
        }
        let stats = counter.snapshot();
        stats.requested == stats.resolved()
    }
}
