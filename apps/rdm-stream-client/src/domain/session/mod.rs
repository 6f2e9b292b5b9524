//! Login / Subscribe Session State Machine
//!
//! # Phases
//!
//! ```text
//! Disconnected ──begin_login──► LoginPending ──login Refresh──► LoggedIn
//!      │                             │                             │
//!      └──────── login Refresh ──────┼─────────────────────────────┘
//!                                    │
//!        close request / login rejected / server error / keepalive expiry
//!                                    ▼
//!                                 Closing ──logout sent──► Closed
//! ```
//!
//! - Subscriptions are only planned once the login refresh arrives; the
//!   base data stream ID is the login refresh `ID + 1`, or the configured
//!   login stream ID + 1 when the refresh has no usable ID.
//! - A second login refresh does not change state.
//! - A login status other than `(Open, Ok)` is fatal: the session goes to
//!   `Closing` and is never retried here.
//! - Every fatal path goes through [`Session::begin_close`], which emits at
//!   most one logout.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use super::keepalive::DEFAULT_PING_INTERVAL;
use super::protocol::{
    CloseRequest, LOGIN_DOMAIN, LoginElements, LoginKey, LoginRequest, OutboundMessage,
    RefreshMessage, StatusMessage, StreamState, TOKEN_NAME_TYPE,
};
use super::subscription::{PlanError, StreamId, SubscriptionPlanner, SubscriptionRequest};

// =============================================================================
// Constants
// =============================================================================

/// Stream ID used for the login request unless configured otherwise.
pub const DEFAULT_LOGIN_STREAM_ID: StreamId = 1;

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Operation not allowed in the current phase.
    #[error("cannot {operation} while session is {phase:?}")]
    InvalidPhase {
        /// Attempted operation.
        operation: &'static str,
        /// Phase at the time of the attempt.
        phase: SessionPhase,
    },

    /// Token reissue requested on a plain (user name) session.
    #[error("token reissue requires token authentication")]
    TokenAuthRequired,

    /// Subscription planning failed.
    #[error("subscription plan failed: {0}")]
    Plan(#[from] PlanError),
}

// =============================================================================
// Session Phase
// =============================================================================

/// Current phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No login sent yet.
    #[default]
    Disconnected,

    /// Login sent, awaiting the login refresh.
    LoginPending,

    /// Login accepted, item requests sent.
    LoggedIn,

    /// Logout requested, waiting for it to be written.
    Closing,

    /// Session finished.
    Closed,
}

impl SessionPhase {
    /// Check if the login has been accepted.
    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn)
    }
}

/// Why the session entered `Closing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit close (user interrupt, caller request).
    Requested,
    /// Auto-exit: every requested item was answered.
    Completed,
    /// Run time limit reached.
    TimeLimit,
    /// Login refused by the server.
    LoginRejected {
        /// State carried by the login status, if any.
        state: Option<StreamState>,
    },
    /// Server sent an `Error` message.
    ServerError(String),
    /// No ping within the negotiated interval.
    KeepAliveExpired,
    /// Transport ended or failed.
    TransportLost(String),
}

impl CloseReason {
    /// Whether this reason is a failure rather than a normal end of run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoginRejected { .. }
                | Self::ServerError(_)
                | Self::KeepAliveExpired
                | Self::TransportLost(_)
        )
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Completed => "completed",
            Self::TimeLimit => "time_limit",
            Self::LoginRejected { .. } => "login_rejected",
            Self::ServerError(_) => "server_error",
            Self::KeepAliveExpired => "keepalive_expired",
            Self::TransportLost(_) => "transport_lost",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// User name login.
    Plain {
        /// Login user name.
        user: String,
    },
    /// Bearer token login.
    Token {
        /// Current authentication token.
        token: String,
    },
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain { user } => f.debug_struct("Plain").field("user", user).finish(),
            Self::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Static session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Authentication mode and credentials.
    pub auth: AuthMode,
    /// Application identifier sent with the login.
    pub application_id: String,
    /// Application position sent with the login.
    pub position: String,
    /// Stream ID of the login request.
    pub login_stream_id: StreamId,
    /// Ping interval assumed until the login refresh announces one.
    pub default_ping_interval: Duration,
}

impl SessionConfig {
    /// Configuration for a user name login.
    #[must_use]
    pub fn plain(
        user: impl Into<String>,
        application_id: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self::with_auth(
            AuthMode::Plain { user: user.into() },
            application_id,
            position,
        )
    }

    /// Configuration for a token login.
    #[must_use]
    pub fn token(
        token: impl Into<String>,
        application_id: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self::with_auth(
            AuthMode::Token {
                token: token.into(),
            },
            application_id,
            position,
        )
    }

    fn with_auth(
        auth: AuthMode,
        application_id: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            application_id: application_id.into(),
            position: position.into(),
            login_stream_id: DEFAULT_LOGIN_STREAM_ID,
            default_ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

// =============================================================================
// Stream Status Records
// =============================================================================

/// Aggregate resolution of one item request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamResolution {
    /// Some items have not been answered.
    Pending,
    /// Every item answered, at least one with a refresh.
    Refreshed,
    /// Every item answered with a rejection.
    Closed,
}

/// Per-request bookkeeping, counted at the same granularity as the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatusRecord {
    /// Always true: a record only exists once its request was emitted.
    pub requested: bool,
    /// Items carried by the request.
    pub items: u64,
    /// Complete refreshes attributed to this request.
    pub refreshed: u64,
    /// Rejections attributed to this request.
    pub closed: u64,
}

impl StreamStatusRecord {
    const fn new(items: u64) -> Self {
        Self {
            requested: true,
            items,
            refreshed: 0,
            closed: 0,
        }
    }

    /// Current resolution.
    #[must_use]
    pub const fn resolution(&self) -> StreamResolution {
        if self.refreshed + self.closed < self.items {
            StreamResolution::Pending
        } else if self.refreshed > 0 {
            StreamResolution::Refreshed
        } else {
            StreamResolution::Closed
        }
    }
}

/// Result of a login refresh that moved the session to `LoggedIn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAccepted {
    /// Ping interval now in force.
    pub ping_interval: Duration,
    /// First data stream ID.
    pub base_stream_id: StreamId,
    /// Item requests to send, in order.
    pub requests: Vec<SubscriptionRequest>,
}

impl LoginAccepted {
    /// Total items across all requests.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.requests.iter().map(|r| r.items.len()).sum()
    }
}

// =============================================================================
// Session
// =============================================================================

/// Login/subscribe state machine for one connection.
///
/// # Example
///
/// ```rust
/// use rdm_stream_client::domain::protocol::RefreshMessage;
/// use rdm_stream_client::domain::session::{Session, SessionConfig, SessionPhase};
/// use rdm_stream_client::domain::subscription::{ItemSpec, SubscriptionPlanner};
///
/// let planner = SubscriptionPlanner::new(vec![ItemSpec::untagged("VOD.L")], None, true);
/// let mut session = Session::new(SessionConfig::plain("user", "256", "127.0.0.1"), planner).unwrap();
///
/// let _login = session.begin_login().unwrap();
/// assert_eq!(session.phase(), SessionPhase::LoginPending);
///
/// let refresh: RefreshMessage = serde_json::from_str(
///     r#"{"ID":1,"Domain":"Login","Elements":{"PingTimeout":30}}"#,
/// ).unwrap();
/// let accepted = session.on_login_refresh(&refresh).unwrap().unwrap();
/// assert_eq!(accepted.requests[0].stream_id, 2);
/// assert!(session.phase().is_logged_in());
/// ```
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    planner: SubscriptionPlanner,
    phase: SessionPhase,
    ping_interval: Duration,
    next_stream_id: StreamId,
    streams: BTreeMap<StreamId, StreamStatusRecord>,
    close_reason: Option<CloseReason>,
}

impl Session {
    /// Create a session in the `Disconnected` phase.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Plan`] if the planner has no items.
    pub fn new(config: SessionConfig, planner: SubscriptionPlanner) -> Result<Self, SessionError> {
        if planner.item_count() == 0 {
            return Err(PlanError::EmptyRequest.into());
        }
        let ping_interval = config.default_ping_interval;
        let next_stream_id = config.login_stream_id.saturating_add(1);
        Ok(Self {
            config,
            planner,
            phase: SessionPhase::Disconnected,
            ping_interval,
            next_stream_id,
            streams: BTreeMap::new(),
            close_reason: None,
        })
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Check if the login has been accepted.
    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        self.phase.is_logged_in()
    }

    /// Ping interval in force.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Next unallocated stream ID.
    #[must_use]
    pub const fn next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Login stream ID.
    #[must_use]
    pub const fn login_stream_id(&self) -> StreamId {
        self.config.login_stream_id
    }

    /// Authentication mode.
    #[must_use]
    pub const fn auth(&self) -> &AuthMode {
        &self.config.auth
    }

    /// Reason recorded when `Closing` was entered.
    #[must_use]
    pub const fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Status records keyed by request stream ID.
    #[must_use]
    pub const fn streams(&self) -> &BTreeMap<StreamId, StreamStatusRecord> {
        &self.streams
    }

    /// Build the initial login request and move to `LoginPending`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPhase`] unless the session is `Disconnected`.
    pub fn begin_login(&mut self) -> Result<OutboundMessage, SessionError> {
        if self.phase != SessionPhase::Disconnected {
            return Err(SessionError::InvalidPhase {
                operation: "begin login",
                phase: self.phase,
            });
        }
        self.phase = SessionPhase::LoginPending;
        Ok(OutboundMessage::Login(self.login_request(false)))
    }

    /// Replace the token and build a reissue login (`Refresh: false`).
    ///
    /// Subscriptions and phase are left untouched.
    ///
    /// # Errors
    ///
    /// - [`SessionError::TokenAuthRequired`] on a plain session.
    /// - [`SessionError::InvalidPhase`] unless `LoginPending` or `LoggedIn`.
    pub fn reissue_token(
        &mut self,
        token: impl Into<String>,
    ) -> Result<OutboundMessage, SessionError> {
        if !matches!(self.config.auth, AuthMode::Token { .. }) {
            return Err(SessionError::TokenAuthRequired);
        }
        if !matches!(
            self.phase,
            SessionPhase::LoginPending | SessionPhase::LoggedIn
        ) {
            return Err(SessionError::InvalidPhase {
                operation: "reissue token",
                phase: self.phase,
            });
        }
        self.config.auth = AuthMode::Token {
            token: token.into(),
        };
        Ok(OutboundMessage::Login(self.login_request(true)))
    }

    /// Process a login-domain refresh.
    ///
    /// Returns `Some` only for the refresh that moves the session to
    /// `LoggedIn`; later refreshes (and refreshes while terminating) are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Plan`] if the subscription plan fails.
    pub fn on_login_refresh(
        &mut self,
        refresh: &RefreshMessage,
    ) -> Result<Option<LoginAccepted>, SessionError> {
        if !matches!(
            self.phase,
            SessionPhase::Disconnected | SessionPhase::LoginPending
        ) {
            return Ok(None);
        }

        if let Some(secs) = refresh.ping_timeout_secs().filter(|s| *s > 0) {
            self.ping_interval = Duration::from_secs(secs);
        }

        let total = StreamId::try_from(self.planner.item_count()).unwrap_or(StreamId::MAX);
        let configured_base = self.config.login_stream_id.saturating_add(1);
        let base_stream_id = refresh
            .id
            .and_then(|id| id.checked_add(1))
            .filter(|base| base.checked_add(total).is_some())
            .unwrap_or(configured_base);
        let requests = self.planner.plan(base_stream_id)?;

        for request in &requests {
            let items = u64::try_from(request.items.len()).unwrap_or(u64::MAX);
            self.streams
                .insert(request.stream_id, StreamStatusRecord::new(items));
        }
        self.next_stream_id = base_stream_id.saturating_add(total);
        self.phase = SessionPhase::LoggedIn;

        Ok(Some(LoginAccepted {
            ping_interval: self.ping_interval,
            base_stream_id,
            requests,
        }))
    }

    /// Process a login-domain status.
    ///
    /// A status whose state is present and not `(Open, Ok)` rejects the
    /// login; the returned logout must be sent. A status without a state
    /// carries no verdict and is ignored.
    pub fn on_login_status(&mut self, status: &StatusMessage) -> Option<OutboundMessage> {
        let state = status.state.as_ref()?;
        if state.is_open_ok() {
            return None;
        }
        self.begin_close(CloseReason::LoginRejected {
            state: Some(state.clone()),
        })
    }

    /// Attribute a complete data refresh to its request.
    pub fn record_data_refresh(&mut self, stream_id: Option<StreamId>) {
        if let Some(record) = self.record_for(stream_id) {
            record.refreshed += 1;
        }
    }

    /// Attribute a rejected item to its request.
    pub fn record_item_rejected(&mut self, stream_id: Option<StreamId>) {
        if let Some(record) = self.record_for(stream_id) {
            record.closed += 1;
        }
    }

    /// Request record owning `stream_id`: exact match, else the nearest
    /// request at or below it (per-item streams follow the request ID).
    /// IDs past the allocated block belong to no request.
    fn record_for(&mut self, stream_id: Option<StreamId>) -> Option<&mut StreamStatusRecord> {
        let id = stream_id.filter(|id| *id < self.next_stream_id)?;
        self.streams
            .range_mut(..=id)
            .next_back()
            .map(|(_, record)| record)
    }

    /// Enter `Closing`.
    ///
    /// Returns the logout to send, or `None` when the session is already
    /// terminating (no double close) or never sent a login (straight to
    /// `Closed`).
    pub fn begin_close(&mut self, reason: CloseReason) -> Option<OutboundMessage> {
        match self.phase {
            SessionPhase::Closing | SessionPhase::Closed => None,
            SessionPhase::Disconnected => {
                self.close_reason = Some(reason);
                self.phase = SessionPhase::Closed;
                None
            }
            SessionPhase::LoginPending | SessionPhase::LoggedIn => {
                self.close_reason = Some(reason);
                self.phase = SessionPhase::Closing;
                Some(OutboundMessage::Close(CloseRequest::login(
                    self.config.login_stream_id,
                )))
            }
        }
    }

    /// Mark the session `Closed` once the logout has been written (or the
    /// transport is gone).
    pub fn mark_closed(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    fn login_request(&self, reissue: bool) -> LoginRequest {
        let (name, name_type, authentication_token) = match &self.config.auth {
            AuthMode::Plain { user } => (Some(user.clone()), None, None),
            AuthMode::Token { token } => (
                None,
                Some(TOKEN_NAME_TYPE.to_string()),
                Some(token.clone()),
            ),
        };
        LoginRequest {
            id: self.config.login_stream_id,
            domain: LOGIN_DOMAIN.to_string(),
            key: LoginKey {
                name,
                name_type,
                elements: LoginElements {
                    application_id: self.config.application_id.clone(),
                    position: self.config.position.clone(),
                    authentication_token,
                },
            },
            refresh: reissue.then_some(false),
        }
    }
}
