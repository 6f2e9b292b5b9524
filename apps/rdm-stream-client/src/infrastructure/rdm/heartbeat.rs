//! Keepalive Ticker
//!
//! Periodically asks the [`KeepAliveMonitor`] whether the server ping
//! deadline has passed and reports expiry to the client loop over a channel.
//! The ticker never touches the session; turning the event into a logout is
//! the loop's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::keepalive::{KeepAliveExpired, KeepAliveMonitor};

/// Default period between deadline checks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Events emitted by the ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// The ping deadline passed.
    Expired(KeepAliveExpired),
}

/// Liveness tick driving a [`KeepAliveMonitor`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rdm_stream_client::domain::keepalive::KeepAliveMonitor;
/// use rdm_stream_client::infrastructure::rdm::heartbeat::{
///     DEFAULT_TICK_INTERVAL, KeepAliveEvent, KeepAliveTicker,
/// };
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let monitor = Arc::new(KeepAliveMonitor::default());
///     let (event_tx, mut event_rx) = mpsc::channel(1);
///     let cancel = CancellationToken::new();
///
///     let ticker = KeepAliveTicker::new(DEFAULT_TICK_INTERVAL, monitor, event_tx, cancel.clone());
///     tokio::spawn(ticker.run());
///
///     if let Some(KeepAliveEvent::Expired(expired)) = event_rx.recv().await {
///         eprintln!("{expired}");
///         cancel.cancel();
///     }
/// }
/// ```
pub struct KeepAliveTicker {
    tick: Duration,
    monitor: Arc<KeepAliveMonitor>,
    event_tx: mpsc::Sender<KeepAliveEvent>,
    cancel: CancellationToken,
}

impl KeepAliveTicker {
    /// Create a new ticker.
    #[must_use]
    pub const fn new(
        tick: Duration,
        monitor: Arc<KeepAliveMonitor>,
        event_tx: mpsc::Sender<KeepAliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tick,
            monitor,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is dropped, or expiry is reported.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keepalive ticker cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check the deadline once.
    ///
    /// Returns `Err(())` when the loop should stop.
    async fn check(&self) -> Result<(), ()> {
        let Some(expired) = self.monitor.check(Instant::now()) else {
            return Ok(());
        };

        tracing::warn!(
            interval_secs = expired.interval.as_secs(),
            silent_secs = expired.silent_for.as_secs(),
            "Keepalive deadline passed"
        );
        let _ = self.event_tx.send(KeepAliveEvent::Expired(expired)).await;
        Err(())
    }
}
