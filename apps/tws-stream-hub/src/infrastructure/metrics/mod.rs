//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Streams**: started/stopped/failed counters and an active gauge
//! - **Events**: upstream events consumed, and duplicates discarded
//! - **Notifications**: cache-change notifications pushed to sinks
//!
//! All metrics are labeled by stream family.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording is
//! a no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::resource::Family;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_hub_streams_started_total",
        "Total stream tasks started"
    );
    describe_counter!(
        "stream_hub_streams_stopped_total",
        "Total stream tasks stopped and deregistered"
    );
    describe_counter!(
        "stream_hub_streams_failed_total",
        "Total stream tasks that hit a fatal upstream error"
    );
    describe_counter!(
        "stream_hub_events_total",
        "Total upstream events consumed by stream tasks"
    );
    describe_counter!(
        "stream_hub_events_deduped_total",
        "Total upstream events discarded as duplicates"
    );
    describe_counter!(
        "stream_hub_notifications_total",
        "Total cache-change notifications pushed to sinks"
    );
    describe_gauge!(
        "stream_hub_active_streams",
        "Number of registered streams per family"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a stream task start.
pub fn record_stream_started(family: Family) {
    counter!("stream_hub_streams_started_total", "family" => family.as_str()).increment(1);
}

/// Record a stream stop and deregistration.
pub fn record_stream_stopped(family: Family) {
    counter!("stream_hub_streams_stopped_total", "family" => family.as_str()).increment(1);
}

/// Record a fatal stream failure.
pub fn record_stream_failed(family: Family) {
    counter!("stream_hub_streams_failed_total", "family" => family.as_str()).increment(1);
}

/// Record one consumed upstream event.
pub fn record_event(family: Family) {
    counter!("stream_hub_events_total", "family" => family.as_str()).increment(1);
}

/// Record one discarded duplicate event.
pub fn record_event_deduped(family: Family) {
    counter!("stream_hub_events_deduped_total", "family" => family.as_str()).increment(1);
}

/// Record one notification pushed to the sink.
pub fn record_notification(family: Family) {
    counter!("stream_hub_notifications_total", "family" => family.as_str()).increment(1);
}

/// Update the registered stream count for a family.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(family: Family, count: usize) {
    gauge!("stream_hub_active_streams", "family" => family.as_str()).set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
