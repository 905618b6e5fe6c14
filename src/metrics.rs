//! Metrics for feed throughput and book maintenance.
//!
//! Counters and histograms are published through the `metrics` facade; the
//! embedding process decides which exporter (if any) to install.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// WebSocket message processing latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Book build latency metric name.
pub const METRIC_BOOK_BUILD_LATENCY: &str = "book_build_latency_ms";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Stale deltas dropped counter metric name.
pub const METRIC_STALE_DELTAS_DROPPED: &str = "stale_deltas_dropped_total";
/// Malformed frames dropped counter metric name.
pub const METRIC_MALFORMED_FRAMES: &str = "malformed_frames_total";
/// Aggregate price updates emitted counter metric name.
pub const METRIC_PRICE_UPDATES_EMITTED: &str = "price_updates_emitted_total";
/// Aggregate price quorum failures counter metric name.
pub const METRIC_PRICE_QUORUM_FAILURES: &str = "price_quorum_failures_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "WebSocket message processing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_BOOK_BUILD_LATENCY,
        "Order book build/projection latency in milliseconds"
    );

    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of WebSocket reconnections");
    describe_counter!(
        METRIC_STALE_DELTAS_DROPPED,
        "Total number of deltas discarded by the stale-delta rule"
    );
    describe_counter!(
        METRIC_MALFORMED_FRAMES,
        "Total number of inbound frames dropped as unparseable"
    );
    describe_counter!(
        METRIC_PRICE_UPDATES_EMITTED,
        "Total number of aggregated price updates emitted"
    );
    describe_counter!(
        METRIC_PRICE_QUORUM_FAILURES,
        "Total number of aggregation passes skipped for lack of quorum"
    );

    debug!("Metrics initialized");
}

/// Record WebSocket message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(latency_ms);
}

/// Record book build latency.
pub fn record_book_build_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_BOOK_BUILD_LATENCY).record(latency_ms);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Increment stale deltas dropped counter.
pub fn inc_stale_deltas_dropped() {
    counter!(METRIC_STALE_DELTAS_DROPPED).increment(1);
}

/// Increment malformed frames counter.
pub fn inc_malformed_frames() {
    counter!(METRIC_MALFORMED_FRAMES).increment(1);
}

/// Increment aggregated price updates counter.
pub fn inc_price_updates_emitted() {
    counter!(METRIC_PRICE_UPDATES_EMITTED).increment(1);
}

/// Increment quorum failure counter.
pub fn inc_price_quorum_failures() {
    counter!(METRIC_PRICE_QUORUM_FAILURES).increment(1);
}
