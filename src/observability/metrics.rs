//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): requests by method, status
//! - `switchyard_request_duration_seconds` (histogram): dispatch latency
//! - `switchyard_timeouts_total` (counter): routes answered by their timeout
//! - `switchyard_panics_total` (counter): panics recovered while serving
//! - `switchyard_active_connections` (gauge): open connections in this process
//! - `switchyard_workers` (gauge): live prefork workers, master only
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; without an installed recorder
//!   every call is a no-op
//! - Only single and master processes install the exporter, so worker
//!   calls are no-ops

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub fn record_request(method: &str, status: u16, started: Instant) {
    counter!(
        "switchyard_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("switchyard_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_timeout() {
    counter!("switchyard_timeouts_total").increment(1);
}

pub fn record_panic() {
    counter!("switchyard_panics_total").increment(1);
}

pub fn set_active_connections(active: u64) {
    gauge!("switchyard_active_connections").set(active as f64);
}

pub fn set_workers(workers: usize) {
    gauge!("switchyard_workers").set(workers as f64);
}

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
/// Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}
