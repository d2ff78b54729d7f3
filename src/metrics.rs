//! Prometheus-compatible metrics endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::state::AppState;
use crate::transcode::process::Outcome;
use crate::transcode::AudioFormat;

/// Per-format conversion counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FormatCounters {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Response dropped before the conversion finished (client went away)
    pub aborted: u64,
}

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Total requests processed
    request_count: AtomicU64,
    /// Requests by endpoint
    requests_by_endpoint: RwLock<HashMap<String, u64>>,
    /// Bytes received from clients and written to the transcoder
    bytes_in: AtomicU64,
    /// Bytes read from the transcoder and sent to clients
    bytes_out: AtomicU64,
    /// Conversions currently running
    active_conversions: AtomicU64,
    /// Conversion counters by output format
    conversions: RwLock<HashMap<AudioFormat, FormatCounters>>,
    /// Errors by type
    errors_by_type: RwLock<HashMap<&'static str, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            requests_by_endpoint: RwLock::new(HashMap::new()),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            active_conversions: AtomicU64::new(0),
            conversions: RwLock::new(HashMap::new()),
            errors_by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Record a request
    pub fn record_request(&self, endpoint: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        *self
            .requests_by_endpoint
            .write()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    /// Record the start of a conversion
    pub fn record_conversion_started(&self, format: AudioFormat) {
        self.active_conversions.fetch_add(1, Ordering::Relaxed);
        self.conversions.write().entry(format).or_default().started += 1;
    }

    /// Record the end of a conversion with its byte counts
    pub fn record_conversion_ended(
        &self,
        format: AudioFormat,
        outcome: Outcome,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        // Never below zero
        let _ = self
            .active_conversions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);

        let mut conversions = self.conversions.write();
        let counters = conversions.entry(format).or_default();
        match outcome {
            Outcome::Succeeded => counters.succeeded += 1,
            Outcome::Failed => counters.failed += 1,
            Outcome::Running | Outcome::Aborted => counters.aborted += 1,
        }
    }

    /// Record error
    pub fn record_error(&self, error_type: &'static str) {
        *self.errors_by_type.write().entry(error_type).or_insert(0) += 1;
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn active_conversions(&self) -> u64 {
        self.active_conversions.load(Ordering::Relaxed)
    }

    pub fn format_counters(&self, format: AudioFormat) -> FormatCounters {
        self.conversions
            .read()
            .get(&format)
            .copied()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn error_count(&self, error_type: &str) -> u64 {
        self.errors_by_type
            .read()
            .get(error_type)
            .copied()
            .unwrap_or(0)
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP ogg_gateway_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE ogg_gateway_uptime_seconds counter\n");
        let _ = writeln!(output, "ogg_gateway_uptime_seconds {}", self.uptime_secs());

        output.push_str("\n# HELP ogg_gateway_requests_total Total number of HTTP requests\n");
        output.push_str("# TYPE ogg_gateway_requests_total counter\n");
        let _ = writeln!(output, "ogg_gateway_requests_total {}", self.request_count());

        output.push_str("\n# HELP ogg_gateway_requests_by_endpoint Requests by endpoint\n");
        output.push_str("# TYPE ogg_gateway_requests_by_endpoint counter\n");
        let mut endpoints: Vec<_> = self
            .requests_by_endpoint
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        endpoints.sort();
        for (endpoint, count) in endpoints {
            let _ = writeln!(
                output,
                "ogg_gateway_requests_by_endpoint{{endpoint=\"{}\"}} {}",
                endpoint, count
            );
        }

        output.push_str("\n# HELP ogg_gateway_active_conversions Conversions currently running\n");
        output.push_str("# TYPE ogg_gateway_active_conversions gauge\n");
        let _ = writeln!(
            output,
            "ogg_gateway_active_conversions {}",
            self.active_conversions()
        );

        output.push_str("\n# HELP ogg_gateway_conversions_total Conversions by format and result\n");
        output.push_str("# TYPE ogg_gateway_conversions_total counter\n");
        for format in AudioFormat::ALL {
            let c = self.format_counters(format);
            for (result, count) in [
                ("started", c.started),
                ("succeeded", c.succeeded),
                ("failed", c.failed),
                ("aborted", c.aborted),
            ] {
                let _ = writeln!(
                    output,
                    "ogg_gateway_conversions_total{{format=\"{}\",result=\"{}\"}} {}",
                    format, result, count
                );
            }
        }

        output.push_str("\n# HELP ogg_gateway_bytes_in_total Bytes written to the transcoder\n");
        output.push_str("# TYPE ogg_gateway_bytes_in_total counter\n");
        let _ = writeln!(
            output,
            "ogg_gateway_bytes_in_total {}",
            self.bytes_in.load(Ordering::Relaxed)
        );

        output.push_str("\n# HELP ogg_gateway_bytes_out_total Bytes read from the transcoder\n");
        output.push_str("# TYPE ogg_gateway_bytes_out_total counter\n");
        let _ = writeln!(
            output,
            "ogg_gateway_bytes_out_total {}",
            self.bytes_out.load(Ordering::Relaxed)
        );

        output.push_str("\n# HELP ogg_gateway_errors_total Total errors by type\n");
        output.push_str("# TYPE ogg_gateway_errors_total counter\n");
        let mut errors: Vec<_> = self
            .errors_by_type
            .read()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        errors.sort();
        for (error_type, count) in errors {
            let _ = writeln!(
                output,
                "ogg_gateway_errors_total{{type=\"{}\"}} {}",
                error_type, count
            );
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
        .into_response()
}
