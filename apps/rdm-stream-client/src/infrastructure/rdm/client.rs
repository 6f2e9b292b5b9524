//! RDM Client Run Loop
//!
//! Drives one session over a [`Transport`]:
//!
//! 1. Arms the keepalive and sends the login.
//! 2. Pumps inbound frames through the [`MessageDispatcher`] and writes what
//!    it returns, in order, on the single write path.
//! 3. Reacts to keepalive expiry, the run time limit, token reissues and
//!    cancellation by closing the session.
//! 4. Logs a statistics line every `stats_interval` and at exit.
//!
//! There is no reconnect: once the session is `Closed` the loop returns a
//! [`RunSummary`] and the caller decides what to do next.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{DEFAULT_TICK_INTERVAL, KeepAliveEvent, KeepAliveTicker};
use crate::application::ports::{Transport, TransportError};
use crate::application::services::MessageDispatcher;
use crate::domain::protocol::{InboundMessage, OutboundMessage};
use crate::domain::session::{CloseReason, SessionError};
use crate::domain::stats::{Stats, StatsCounter};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a run abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame could not be decoded or a message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Session rejected an operation.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

// =============================================================================
// Settings
// =============================================================================

/// Which traffic is logged verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// Log every received frame.
    pub received: bool,
    /// Log every sent frame.
    pub sent: bool,
    /// Include Ping/Pong traffic in the dumps above.
    pub ping_pong: bool,
    /// Log each item status.
    pub statuses: bool,
}

/// Run loop timing and output settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Keepalive check period.
    pub tick_interval: Duration,
    /// Statistics log period; `None` disables periodic reports.
    pub stats_interval: Option<Duration>,
    /// Run time limit; `None` runs until closed.
    pub exit_after: Option<Duration>,
    /// Verbatim logging.
    pub dump: DumpOptions,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            stats_interval: Some(Duration::from_secs(10)),
            exit_after: None,
            dump: DumpOptions::default(),
        }
    }
}

// =============================================================================
// Run Summary
// =============================================================================

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Why the session closed.
    pub reason: CloseReason,
    /// Final counters.
    pub stats: Stats,
    /// Wall clock start.
    pub started_at: DateTime<Utc>,
    /// Run duration.
    pub elapsed: Duration,
}

impl RunSummary {
    /// True unless the session ended on a fatal condition.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.reason.is_fatal()
    }

    /// Statistics line for this run.
    #[must_use]
    pub const fn report(&self) -> StatsReport {
        StatsReport {
            stats: self.stats,
            elapsed: self.elapsed,
        }
    }
}

/// One-line statistics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsReport {
    /// Counters at report time.
    pub stats: Stats,
    /// Time since the run started.
    pub elapsed: Duration,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats; Refresh: {} Updates: {} Status: {} Pings: {} Elapsed: {}s",
            self.stats.refreshed,
            self.stats.updated,
            self.stats.statused,
            self.stats.pinged,
            self.elapsed.as_secs()
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Session run loop over a transport.
pub struct RdmClient<T: Transport> {
    transport: T,
    dispatcher: MessageDispatcher,
    codec: JsonCodec,
    settings: ClientSettings,
    cancel: CancellationToken,
    token_rx: Option<mpsc::Receiver<String>>,
}

impl<T: Transport> RdmClient<T> {
    /// Create a client; nothing is sent until [`run`](Self::run).
    #[must_use]
    pub const fn new(
        transport: T,
        dispatcher: MessageDispatcher,
        settings: ClientSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            codec: JsonCodec::new(),
            settings,
            cancel,
            token_rx: None,
        }
    }

    /// Accept replacement tokens while running; each one triggers a
    /// reissue login.
    #[must_use]
    pub fn with_token_updates(mut self, token_rx: mpsc::Receiver<String>) -> Self {
        self.token_rx = Some(token_rx);
        self
    }

    /// Shared counters, readable while the client runs.
    #[must_use]
    pub fn stats(&self) -> Arc<StatsCounter> {
        self.dispatcher.stats()
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if a frame cannot be read or written.
    /// - [`ClientError::Codec`] for a malformed frame (a logout is still
    ///   attempted).
    /// - [`ClientError::Session`] if the session refuses the login.
    pub async fn run(mut self) -> Result<RunSummary, ClientError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let (event_tx, mut event_rx) = mpsc::channel::<KeepAliveEvent>(1);
        let ticker_cancel = self.cancel.child_token();
        let ticker = KeepAliveTicker::new(
            self.settings.tick_interval,
            self.dispatcher.keepalive(),
            event_tx,
            ticker_cancel.clone(),
        );
        tokio::spawn(ticker.run());

        let result = self.pump(started, &mut event_rx).await;
        ticker_cancel.cancel();

        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Transport close failed");
        }

        let reason = result?;
        metrics::record_session_close(reason.as_str());

        let summary = RunSummary {
            reason,
            stats: self.dispatcher.stats().snapshot(),
            started_at,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            reason = summary.reason.as_str(),
            started_at = %summary.started_at.to_rfc3339(),
            "{}",
            summary.report()
        );
        Ok(summary)
    }

    async fn pump(
        &mut self,
        started: Instant,
        events: &mut mpsc::Receiver<KeepAliveEvent>,
    ) -> Result<CloseReason, ClientError> {
        let login = self.dispatcher.start(Instant::now())?;
        self.write(&login).await?;

        let mut stats_timer = self.settings.stats_interval.map(|period| {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let exit_armed = self.settings.exit_after.is_some();
        let exit_deadline = tokio::time::sleep(self.settings.exit_after.unwrap_or_default());
        tokio::pin!(exit_deadline);

        loop {
            let reason = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Cancellation requested");
                    CloseReason::Requested
                }
                Some(KeepAliveEvent::Expired(expired)) = events.recv() => {
                    tracing::error!(error = %expired, "Keepalive expired");
                    CloseReason::KeepAliveExpired
                }
                () = &mut exit_deadline, if exit_armed => {
                    tracing::info!("Run time limit reached");
                    CloseReason::TimeLimit
                }
                () = next_tick(&mut stats_timer) => {
                    self.report_stats(started);
                    continue;
                }
                Some(token) = next_token(&mut self.token_rx) => {
                    self.reissue(token).await?;
                    continue;
                }
                frame = self.transport.recv() => match frame {
                    Some(Ok(text)) => match self.on_frame(&text).await? {
                        Some(reason) => {
                            self.dispatcher.mark_closed();
                            return Ok(reason);
                        }
                        None => continue,
                    },
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Transport receive failed");
                        self.abandon(CloseReason::TransportLost(e.to_string()));
                        return Err(e.into());
                    }
                    None => {
                        tracing::warn!("Transport closed by peer");
                        return Ok(self.abandon(CloseReason::TransportLost(
                            "connection closed by peer".to_string(),
                        )));
                    }
                },
            };
            return self.close(reason).await;
        }
    }

    /// Decode and dispatch one frame; returns the close reason if the batch
    /// closed the session.
    async fn on_frame(&mut self, text: &str) -> Result<Option<CloseReason>, ClientError> {
        let batch = match self.codec.decode(text) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Malformed frame");
                self.close(CloseReason::TransportLost(format!("malformed frame: {e}")))
                    .await?;
                return Err(e.into());
            }
        };

        let dump = self.settings.dump;
        let only_pings =
            !batch.is_empty() && batch.iter().all(|m| matches!(m, Ok(InboundMessage::Ping)));
        if dump.received && (dump.ping_pong || !only_pings) {
            tracing::info!(frame = %text, "Received");
        }
        for message in batch.iter().flatten() {
            metrics::record_message_received(message.kind());
            if dump.statuses
                && let InboundMessage::Status(status) = message
            {
                tracing::info!(stream_id = ?status.id, state = ?status.state, "Status");
            }
        }

        let dispatch_started = Instant::now();
        let outcome = self.dispatcher.process_batch(batch, dispatch_started)?;
        metrics::record_batch_duration(dispatch_started.elapsed());

        if !outcome.rejected.is_empty() {
            let rejected = u64::try_from(outcome.rejected.len()).unwrap_or(u64::MAX);
            metrics::record_messages_rejected(rejected);
        }
        if outcome
            .outbound
            .iter()
            .any(|m| matches!(m, OutboundMessage::Subscribe(_)))
        {
            metrics::set_items_requested(self.dispatcher.stats().snapshot().requested);
        }

        for message in &outcome.outbound {
            self.write(message).await?;
        }
        Ok(outcome.close)
    }

    async fn reissue(&mut self, token: String) -> Result<(), ClientError> {
        match self.dispatcher.reissue_token(token) {
            Ok(login) => self.write(&login).await,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring token reissue");
                Ok(())
            }
        }
    }

    /// Send the logout (if any) and mark the session closed.
    async fn close(&mut self, reason: CloseReason) -> Result<CloseReason, ClientError> {
        if let Some(logout) = self.dispatcher.request_close(reason.clone()) {
            self.write(&logout).await?;
        }
        self.dispatcher.mark_closed();
        Ok(self.dispatcher.session().close_reason().cloned().unwrap_or(reason))
    }

    /// Close without a logout: the transport is unusable.
    fn abandon(&mut self, reason: CloseReason) -> CloseReason {
        let _ = self.dispatcher.request_close(reason.clone());
        self.dispatcher.mark_closed();
        self.dispatcher.session().close_reason().cloned().unwrap_or(reason)
    }

    async fn write(&mut self, message: &OutboundMessage) -> Result<(), ClientError> {
        let frame = self.codec.encode(message)?;
        let dump = self.settings.dump;
        if dump.sent && (dump.ping_pong || !matches!(message, OutboundMessage::Pong)) {
            tracing::info!(frame = %frame, "Sent");
        } else {
            tracing::debug!(message_type = message.label(), "Sending");
        }
        self.transport.send(frame).await?;
        metrics::record_message_sent(message.label());
        Ok(())
    }

    fn report_stats(&self, started: Instant) {
        let report = StatsReport {
            stats: self.dispatcher.stats().snapshot(),
            elapsed: started.elapsed(),
        };
        tracing::info!("{report}");
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_token(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
