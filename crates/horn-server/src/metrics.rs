// Metrics module for observability
// Describes the counters and gauges recorded across the Horn crates

use metrics::{describe_counter, describe_gauge};

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Broker metrics
    describe_counter!(
        "horn_notifications_received_total",
        "Total number of twins notifications received from the broker"
    );
    describe_counter!(
        "horn_notifications_failed_total",
        "Total number of twins notifications that could not be delivered"
    );
    describe_counter!(
        "horn_payload_errors_total",
        "Total number of broker payloads that failed to decode"
    );

    // Stream metrics
    describe_counter!(
        "horn_updates_delivered_total",
        "Total number of updates pushed to client streams"
    );
    describe_gauge!("horn_active_streams", "Number of open client streams");

    // Session metrics
    describe_counter!(
        "horn_sessions_expired_total",
        "Total number of client sessions warned for an expired token"
    );

    tracing::info!("Metrics initialized");
}
