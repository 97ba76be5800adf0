//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const USERS_ONLINE: &str = "courier_users_online";
    pub const MESSAGES_STORED_TOTAL: &str = "courier_messages_stored_total";
    pub const MESSAGES_RELAYED_TOTAL: &str = "courier_messages_relayed_total";
    pub const TYPING_EVENTS_TOTAL: &str = "courier_typing_events_total";
    pub const READ_RECEIPTS_TOTAL: &str = "courier_read_receipts_total";
    pub const ROOMS_ACTIVE: &str = "courier_rooms_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "courier_subscriptions_total";
    pub const LATENCY_SECONDS: &str = "courier_latency_seconds";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    ::metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    ::metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    ::metrics::describe_gauge!(names::USERS_ONLINE, "Current number of users online");
    ::metrics::describe_counter!(
        names::MESSAGES_STORED_TOTAL,
        "Total number of messages persisted"
    );
    ::metrics::describe_counter!(
        names::MESSAGES_RELAYED_TOTAL,
        "Total number of messages relayed to rooms"
    );
    ::metrics::describe_counter!(
        names::TYPING_EVENTS_TOTAL,
        "Total number of typing indicators relayed"
    );
    ::metrics::describe_counter!(
        names::READ_RECEIPTS_TOTAL,
        "Total number of read receipts recorded"
    );
    ::metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    ::metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of room subscriptions"
    );
    ::metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Frame processing latency in seconds"
    );
    ::metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record a persisted message.
pub fn record_stored_message() {
    counter!(names::MESSAGES_STORED_TOTAL).increment(1);
}

/// Record a relayed message.
pub fn record_relayed_message() {
    counter!(names::MESSAGES_RELAYED_TOTAL).increment(1);
}

/// Record a relayed typing indicator.
pub fn record_typing_event() {
    counter!(names::TYPING_EVENTS_TOTAL).increment(1);
}

/// Record read receipts.
pub fn record_read_receipts(count: usize) {
    counter!(names::READ_RECEIPTS_TOTAL).increment(count as u64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a room subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Update the live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
