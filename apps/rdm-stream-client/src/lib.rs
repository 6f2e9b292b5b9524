#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! RDM Stream Client - Websocket Session Layer
//!
//! Client side of an RDM JSON (`tr_json2`) websocket session: log in,
//! subscribe to a list of items in per-domain batches, answer server pings,
//! count what comes back and log out cleanly.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Protocol types and session rules, no I/O
//!   - `protocol`: Wire messages and stream state
//!   - `subscription`: Batch request planning and stream ID assignment
//!   - `stats`: Message counters and auto-exit completion
//!   - `keepalive`: Server ping deadline
//!   - `session`: Login / subscribe / close state machine
//!
//! - **Application**: Port definitions and the message dispatcher
//!   - `ports`: Transport interface
//!   - `services`: Inbound message routing
//!
//! - **Infrastructure**: Adapters and process wiring
//!   - `rdm`: JSON codec, websocket transport, keepalive ticker, run loop
//!   - `config`: Command line options and item files
//!   - `metrics`: Prometheus counters
//!   - `telemetry`: Logging and OTLP tracing
//!
//! # Data Flow
//!
//! ```text
//!  websocket frame -> JsonCodec -> MessageDispatcher -> Session / StatsCounter
//!                                        |                   |
//!                                        v                   v
//!                              Pong / Subscribe / Close   KeepAliveMonitor <- KeepAliveTicker
//!                                        |
//!                                        v
//!                                  websocket frame
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Protocol types and session rules with no I/O.
pub mod domain;

/// Application layer - Ports and the message dispatcher.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::keepalive::{KeepAliveExpired, KeepAliveMonitor};
pub use domain::session::{CloseReason, Session, SessionConfig, SessionError, SessionPhase};
pub use domain::stats::{CompletionTracker, Stats, StatsCounter};
pub use domain::subscription::{ItemSpec, SubscriptionPlanner, SubscriptionRequest, ViewFields};

// Application
pub use application::ports::{Transport, TransportError};
pub use application::services::{DispatchOutcome, MessageDispatcher};

// Client
pub use infrastructure::config::{CliOptions, ClientConfig, ConfigError};
pub use infrastructure::rdm::{ClientError, ClientSettings, RdmClient, RunSummary};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
