//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus process wiring.

/// Command line and item file configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// RDM websocket adapters: codec, transport, keepalive ticker, run loop.
pub mod rdm;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
