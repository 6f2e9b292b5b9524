//! Domain Layer - Session logic and wire types.
//!
//! Everything here is transport agnostic: the state machine, counters and
//! keepalive deadline take `now` and messages as inputs and never perform
//! I/O.

/// RDM JSON message types (inbound and outbound).
pub mod protocol;

/// Grouping of requested items into batch item requests.
pub mod subscription;

/// Message counters and the auto-exit completion rule.
pub mod stats;

/// Ping deadline tracking.
pub mod keepalive;

/// Login/subscribe state machine.
pub mod session;
