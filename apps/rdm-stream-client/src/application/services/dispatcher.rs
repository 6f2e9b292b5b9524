//! Message Dispatcher
//!
//! Routes each decoded inbound message to the session, the counters and the
//! keepalive monitor, and collects the outbound messages the caller must
//! write. Synchronous and socket free: the run loop hands it one transport
//! delivery at a time.
//!
//! # Routing
//!
//! | Type    | Domain | Effect |
//! |---------|--------|--------|
//! | Refresh | Login  | login-success transition, emits item requests |
//! | Refresh | other  | `refreshed += 1` unless `Complete: false` |
//! | Update  | any    | `updated += 1` |
//! | Status  | Login  | logged verbatim; not `(Open, Ok)` closes the session |
//! | Status  | other  | `statused += 1`, plus `closed_status` on `(Closed, Suspect)` |
//! | Ping    |        | `pinged += 1`, Pong, keepalive reset |
//! | Error   |        | closes the session |

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use crate::domain::keepalive::KeepAliveMonitor;
use crate::domain::protocol::{
    ErrorMessage, InboundMessage, LOGIN_DOMAIN, OutboundMessage, RefreshMessage, StatusMessage,
};
use crate::domain::session::{CloseReason, Session, SessionError};
use crate::domain::stats::{CompletionTracker, StatsCounter};

/// Result of processing one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Messages to write, in order.
    pub outbound: Vec<OutboundMessage>,
    /// Set when this batch moved the session to `Closing`.
    pub close: Option<CloseReason>,
    /// Elements that could not be decoded (unknown `Type`, bad shape).
    pub rejected: Vec<String>,
    /// Messages routed.
    pub processed: usize,
}

/// Routes inbound messages for one session.
#[derive(Debug)]
pub struct MessageDispatcher {
    session: Session,
    stats: Arc<StatsCounter>,
    keepalive: Arc<KeepAliveMonitor>,
    completion: CompletionTracker,
}

impl MessageDispatcher {
    /// Create a dispatcher owning `session`.
    #[must_use]
    pub const fn new(
        session: Session,
        stats: Arc<StatsCounter>,
        keepalive: Arc<KeepAliveMonitor>,
        completion: CompletionTracker,
    ) -> Self {
        Self {
            session,
            stats,
            keepalive,
            completion,
        }
    }

    /// The session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<StatsCounter> {
        Arc::clone(&self.stats)
    }

    /// Shared keepalive monitor.
    #[must_use]
    pub fn keepalive(&self) -> Arc<KeepAliveMonitor> {
        Arc::clone(&self.keepalive)
    }

    /// Arm the keepalive and build the initial login.
    ///
    /// Called once the transport is open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPhase`] if a login was already sent.
    pub fn start(&mut self, now: Instant) -> Result<OutboundMessage, SessionError> {
        let login = self.session.begin_login()?;
        self.keepalive.set_interval(self.session.ping_interval());
        self.keepalive.reset(now);
        Ok(login)
    }

    /// Build a token reissue login.
    ///
    /// # Errors
    ///
    /// See [`Session::reissue_token`].
    pub fn reissue_token(
        &mut self,
        token: impl Into<String>,
    ) -> Result<OutboundMessage, SessionError> {
        let login = self.session.reissue_token(token)?;
        tracing::info!("Token reissue login prepared");
        Ok(login)
    }

    /// Drive the session to `Closing` for a reason raised outside the
    /// message stream (keepalive expiry, time limit, interrupt).
    ///
    /// Returns the logout to send, if any.
    pub fn request_close(&mut self, reason: CloseReason) -> Option<OutboundMessage> {
        self.close(reason)
    }

    /// Mark the session closed after the logout was written.
    pub fn mark_closed(&mut self) {
        self.session.mark_closed();
    }

    /// Process one transport delivery in order.
    ///
    /// Undecodable elements are listed in [`DispatchOutcome::rejected`] and
    /// skipped. The keepalive deadline is reset once the batch is done,
    /// whatever it contained.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Plan`] if the login refresh cannot be turned
    /// into item requests.
    pub fn process_batch<E: Display>(
        &mut self,
        batch: impl IntoIterator<Item = Result<InboundMessage, E>>,
        now: Instant,
    ) -> Result<DispatchOutcome, SessionError> {
        let mut outcome = DispatchOutcome::default();

        for decoded in batch {
            match decoded {
                Ok(message) => {
                    self.dispatch(message, now, &mut outcome)?;
                    outcome.processed += 1;
                    if self.completion.is_complete(&self.stats) {
                        self.close_into(CloseReason::Completed, &mut outcome);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable message");
                    outcome.rejected.push(e.to_string());
                }
            }
        }

        self.keepalive.reset(now);
        Ok(outcome)
    }

    fn dispatch(
        &mut self,
        message: InboundMessage,
        now: Instant,
        outcome: &mut DispatchOutcome,
    ) -> Result<(), SessionError> {
        match message {
            InboundMessage::Refresh(refresh) if refresh.domain() == LOGIN_DOMAIN => {
                self.on_login_refresh(&refresh, outcome)?;
            }
            InboundMessage::Refresh(refresh) => self.on_data_refresh(&refresh),
            InboundMessage::Update(_) => self.stats.record_update(),
            InboundMessage::Status(status) if status.domain() == LOGIN_DOMAIN => {
                self.on_login_status(&status, outcome);
            }
            InboundMessage::Status(status) => self.on_data_status(&status),
            InboundMessage::Ping => {
                self.stats.record_ping();
                self.keepalive.reset(now);
                outcome.outbound.push(OutboundMessage::Pong);
            }
            InboundMessage::Error(error) => self.on_error(&error, outcome),
        }
        Ok(())
    }

    fn on_login_refresh(
        &mut self,
        refresh: &RefreshMessage,
        outcome: &mut DispatchOutcome,
    ) -> Result<(), SessionError> {
        let Some(accepted) = self.session.on_login_refresh(refresh)? else {
            tracing::debug!(phase = ?self.session.phase(), "Ignoring login refresh");
            return Ok(());
        };

        let item_count = accepted.item_count();
        self.keepalive.set_interval(accepted.ping_interval);
        self.stats
            .add_requested(u64::try_from(item_count).unwrap_or(u64::MAX));

        tracing::info!(
            ping_interval_secs = accepted.ping_interval.as_secs(),
            base_stream_id = accepted.base_stream_id,
            requests = accepted.requests.len(),
            items = item_count,
            "Logged in, subscribing"
        );

        outcome.outbound.extend(
            accepted
                .requests
                .into_iter()
                .map(OutboundMessage::Subscribe),
        );
        Ok(())
    }

    fn on_data_refresh(&mut self, refresh: &RefreshMessage) {
        if refresh.is_partial() {
            tracing::trace!(stream_id = ?refresh.id, "Partial refresh, awaiting more fragments");
            return;
        }
        self.stats.record_refresh();
        self.session.record_data_refresh(refresh.id);
    }

    fn on_login_status(&mut self, status: &StatusMessage, outcome: &mut DispatchOutcome) {
        let verbatim = serde_json::to_string(status).unwrap_or_default();
        tracing::warn!(status = %verbatim, "Login status received");

        if let Some(logout) = self.session.on_login_status(status) {
            tracing::error!(state = ?status.state, "Login rejected");
            outcome.outbound.push(logout);
            outcome.close = self.session.close_reason().cloned();
        }
    }

    fn on_data_status(&mut self, status: &StatusMessage) {
        let rejected = status.is_closed_suspect();
        self.stats.record_status(rejected);
        if rejected {
            tracing::debug!(stream_id = ?status.id, state = ?status.state, "Item rejected");
            self.session.record_item_rejected(status.id);
        }
    }

    fn on_error(&mut self, error: &ErrorMessage, outcome: &mut DispatchOutcome) {
        let text = error.text.clone().unwrap_or_default();
        tracing::error!(stream_id = ?error.id, text = %text, "Server error message");
        self.close_into(CloseReason::ServerError(text), outcome);
    }

    fn close_into(&mut self, reason: CloseReason, outcome: &mut DispatchOutcome) {
        if let Some(logout) = self.close(reason) {
            outcome.outbound.push(logout);
            outcome.close = self.session.close_reason().cloned();
        }
    }

    fn close(&mut self, reason: CloseReason) -> Option<OutboundMessage> {
        let label = reason.as_str();
        let logout = self.session.begin_close(reason);
        if logout.is_some() {
            tracing::info!(reason = label, "Closing session");
        }
        logout
    }
}
