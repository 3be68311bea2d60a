// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for db-gate.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.). Without a recorder installed every call is a no-op.
//!
//! # Metric Naming Convention
//! - `db_gate_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: primary, fallback
//! - `outcome`: success, failure, exhausted, skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a liveness probe result
pub fn record_probe(outcome: &str) {
    counter!(
        "db_gate_probes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the end of a reconnect sequence
pub fn record_reconnect(outcome: &str, attempts: u32, duration: Duration) {
    counter!(
        "db_gate_reconnect_sequences_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("db_gate_reconnect_attempts").record(f64::from(attempts));
    histogram!("db_gate_reconnect_seconds").record(duration.as_secs_f64());
}

/// Record which backend served a `get_connection` call
pub fn record_backend_selected(backend: &str) {
    counter!(
        "db_gate_connections_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Set primary availability (0 = Unknown, 1 = Available, 2 = Unavailable)
pub fn set_primary_availability(state: u8) {
    gauge!("db_gate_primary_availability").set(f64::from(state));
}

/// Set number of open fallback connections
pub fn set_fallback_connections(count: usize) {
    gauge!("db_gate_fallback_connections").set(count as f64);
}

/// Record a derived-value cache lookup
pub fn record_cache(key: &str, hit: bool) {
    counter!(
        "db_gate_cache_lookups_total",
        "key" => key.to_string(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Record a query through `Connection::fetch_rows`
pub fn record_query(backend: &str, status: &str) {
    counter!(
        "db_gate_queries_total",
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record query latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "db_gate_query_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an error with category for alerting
pub fn record_error(backend: &str, operation: &str, error_type: &str) {
    counter!(
        "db_gate_errors_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
