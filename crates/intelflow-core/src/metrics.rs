//! Prometheus metrics helpers for the intelflow system.
//!
//! This module provides centralized metrics initialization and common metric
//! definitions used across intelflow components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use intelflow_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for /metrics endpoint
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::{counter, gauge};
//!     counter!("my_counter").increment(1);
//!     gauge!("my_gauge").set(42.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (e.g., `dispatch_`, `contrib_`, `geo_`)
//! - Suffix: unit or type (e.g., `_total`, `_seconds`)
//! - Labels: use sparingly to avoid cardinality explosion

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for common metrics used across intelflow.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Dispatch Metrics
    // =========================================================================

    describe_counter!("dispatch_frames_total", "Total frames fed to the dispatcher");
    describe_counter!(
        "dispatch_unknown_topic_total",
        "Frames dropped because their topic is not in the enumerated set"
    );
    describe_counter!(
        "dispatch_malformed_total",
        "Frames dropped because they failed to parse"
    );
    describe_counter!(
        "dispatch_attributes_total",
        "Attribute-handler invocations (after event expansion)"
    );
    describe_counter!("dispatch_sightings_total", "Sighting frames processed");
    describe_counter!("dispatch_keepalives_total", "Keepalive frames processed");
    describe_counter!(
        "dispatch_log_only_total",
        "Frames acknowledged on log-only topics"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the dispatch loop is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Contribution / Rank Metrics
    // =========================================================================

    describe_counter!(
        "contrib_records_total",
        "Contribution records produced (attributes and sightings)"
    );
    describe_counter!(
        "contrib_points_total",
        "Points credited across all organisations"
    );
    describe_counter!(
        "rank_requirements_set_total",
        "Rank-requirement flags set or refreshed"
    );

    // =========================================================================
    // Geo Enrichment Metrics
    // =========================================================================

    describe_counter!(
        "geo_enrichments_total",
        "Network-indicator values successfully enriched with coordinates"
    );
    describe_counter!(
        "geo_failures_total",
        "Enrichment skips (label: reason = invalid|not_found)"
    );

    // =========================================================================
    // Publish Metrics
    // =========================================================================

    describe_counter!(
        "publish_envelopes_total",
        "Notification envelopes handed to the publisher"
    );
    describe_counter!(
        "publish_errors_total",
        "Envelopes dropped on the way to the outbound sink"
    );
}

/// Increment a counter.
///
/// Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_increment_does_not_panic() {
        ensure_metrics_init();
        increment("test_counter", 0);
        increment("test_counter", 1);
        increment("test_counter", 100);
    }

    #[test]
    fn test_set_gauge_does_not_panic() {
        ensure_metrics_init();
        set_gauge("test_gauge", 0.0);
        set_gauge("test_gauge", 42.5);
        set_gauge("test_gauge", -100.0);
    }

    #[test]
    fn test_register_common_metrics_idempotent() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
