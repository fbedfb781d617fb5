//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const LOGINS_TOTAL: &str = "huddle_logins_total";
    pub const LOGIN_SECONDS: &str = "huddle_login_seconds";
    pub const CHAT_MESSAGES_TOTAL: &str = "huddle_chat_messages_total";
    pub const FRAME_BYTES: &str = "huddle_frame_bytes";
    pub const ROOMS_ACTIVE: &str = "huddle_rooms_active";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::LOGINS_TOTAL, "Login attempts by result");
    metrics::describe_histogram!(names::LOGIN_SECONDS, "Time from login frame to welcome");
    metrics::describe_counter!(names::CHAT_MESSAGES_TOTAL, "Chat frames received");
    metrics::describe_counter!(names::FRAME_BYTES, "Frame bytes by direction");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

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

/// Record a login attempt; `result` is `"ok"` or the rejection reason.
pub fn record_login(result: &'static str, seconds: f64) {
    counter!(names::LOGINS_TOTAL, "result" => result).increment(1);
    if result == "ok" {
        histogram!(names::LOGIN_SECONDS).record(seconds);
    }
}

pub fn record_chat() {
    counter!(names::CHAT_MESSAGES_TOTAL).increment(1);
}

/// Record frame bytes; `direction` is `"inbound"` or `"outbound"`.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::FRAME_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Update live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Mirror the registry's room count into the rooms gauge until the registry
/// stops.
pub async fn track_active_rooms(mut rooms: watch::Receiver<usize>) {
    loop {
        set_active_rooms(*rooms.borrow_and_update());
        if rooms.changed().await.is_err() {
            break;
        }
    }
    debug!("Room registry stopped, no longer tracking rooms");
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
