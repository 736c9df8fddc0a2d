//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): request latency
//! - `operation_duration_seconds` (histogram): tracked operations by name, status
//! - `records_saved_total` (counter): rows committed by units of work
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    let method = method.to_string();
    let status = status.to_string();
    counter!("http_requests_total", "method" => method.clone(), "status" => status.clone())
        .increment(1);
    histogram!("http_request_duration_seconds", "method" => method, "status" => status)
        .record(elapsed.as_secs_f64());
}

pub fn record_operation(name: &str, status: &'static str, elapsed: Duration) {
    histogram!(
        "operation_duration_seconds",
        "operation" => name.to_string(),
        "status" => status
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_records_saved(count: usize) {
    counter!("records_saved_total").increment(count as u64);
}
