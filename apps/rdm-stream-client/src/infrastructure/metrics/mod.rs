//! Prometheus Metrics Module
//!
//! Exposes session metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Counts of messages received and sent by type
//! - **Session**: Items requested, rejected elements, closes by reason
//! - **Latency**: Batch processing time
//!
//! # Integration
//!
//! With a non-zero metrics port the exporter serves `/metrics` over HTTP;
//! otherwise the recorder is installed without a listener and the counters
//! are only reachable through [`get_metrics_handle`].

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::protocol::MessageKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder without an HTTP listener.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if [`init_metrics`] has not been called.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "rdm_client_messages_received_total",
        "Total inbound messages by type"
    );
    describe_counter!(
        "rdm_client_messages_sent_total",
        "Total outbound messages by type"
    );
    describe_counter!(
        "rdm_client_messages_rejected_total",
        "Inbound elements that could not be decoded"
    );
    describe_gauge!(
        "rdm_client_items_requested",
        "Items requested by the subscription plan"
    );
    describe_counter!(
        "rdm_client_session_closes_total",
        "Session closes by reason"
    );
    describe_histogram!(
        "rdm_client_batch_processing_seconds",
        "Time to dispatch one inbound delivery"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn kind_label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Refresh => "refresh",
        MessageKind::Update => "update",
        MessageKind::Status => "status",
        MessageKind::Ping => "ping",
        MessageKind::Error => "error",
    }
}

/// Record an inbound message.
pub fn record_message_received(kind: MessageKind) {
    counter!(
        "rdm_client_messages_received_total",
        "message_type" => kind_label(kind)
    )
    .increment(1);
}

/// Record an outbound message; `label` is [`OutboundMessage::label`].
///
/// [`OutboundMessage::label`]: crate::domain::protocol::OutboundMessage::label
pub fn record_message_sent(label: &'static str) {
    counter!(
        "rdm_client_messages_sent_total",
        "message_type" => label
    )
    .increment(1);
}

/// Record elements skipped by the decoder.
pub fn record_messages_rejected(count: u64) {
    counter!("rdm_client_messages_rejected_total").increment(count);
}

/// Update the requested item count.
#[allow(clippy::cast_precision_loss)]
pub fn set_items_requested(count: u64) {
    gauge!("rdm_client_items_requested").set(count as f64);
}

/// Record a session close.
pub fn record_session_close(reason: &'static str) {
    counter!(
        "rdm_client_session_closes_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record batch dispatch duration.
pub fn record_batch_duration(duration: Duration) {
    histogram!("rdm_client_batch_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
