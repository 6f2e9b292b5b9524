//! Application Layer - Use cases and port definitions.
//!
//! This layer routes decoded messages through the session and defines the
//! transport contract the infrastructure adapters implement.

/// Port interfaces for external systems (websocket transport).
pub mod ports;

/// Application services (message dispatch).
pub mod services;
