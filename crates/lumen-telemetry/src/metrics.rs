//! Prometheus metrics.
//!
//! Recording functions are safe to call before [`init_metrics`]: without an
//! installed recorder the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_telemetry::metrics::{record_cache_lookup, record_request};
//!
//! record_cache_lookup(true);
//! record_request("GET /images/{id}", 200, Duration::from_millis(4));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();
    tracing::info!(%addr, "prometheus exporter listening");

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!("lumen_requests_total", "Total number of HTTP requests processed");
    describe_histogram!(
        "lumen_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "lumen_in_flight_requests",
        "Number of HTTP requests currently being processed"
    );
    describe_counter!(
        "lumen_rate_limited_total",
        "Requests rejected by the rate limiter"
    );
    describe_counter!(
        "lumen_cache_lookups_total",
        "Response cache lookups by result"
    );
    describe_counter!(
        "lumen_auth_outcomes_total",
        "Authentication outcomes by result"
    );
    describe_counter!(
        "lumen_permission_decisions_total",
        "Permission resolver decisions by level and outcome"
    );
}

/// Records a completed request.
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        "lumen_requests_total",
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "lumen_request_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a request rejected with 429.
pub fn record_rate_limited() {
    counter!("lumen_rate_limited_total").increment(1);
}

/// Records a response cache lookup.
pub fn record_cache_lookup(hit: bool) {
    counter!(
        "lumen_cache_lookups_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Records an authentication outcome (`user`, `anonymous`, `invalid`, `error`).
pub fn record_auth_outcome(outcome: &'static str) {
    counter!("lumen_auth_outcomes_total", "outcome" => outcome).increment(1);
}

/// Records a permission decision.
///
/// `outcome` is one of `granted`, `forbidden`, `masked`, `not_found`, `error`.
pub fn record_permission_decision(level: &'static str, outcome: &'static str) {
    counter!(
        "lumen_permission_decisions_total",
        "level" => level,
        "outcome" => outcome
    )
    .increment(1);
}

/// Guard that tracks one in-flight request.
///
/// Increments the gauge on creation and decrements it on drop, including
/// when the request future is cancelled or panics.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("lumen_in_flight_requests").increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("lumen_in_flight_requests").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: "not-an-address".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_request("GET /images/{id}", 200, Duration::from_millis(10));
        record_rate_limited();
        record_cache_lookup(true);
        record_cache_lookup(false);
        record_auth_outcome("anonymous");
        record_permission_decision("can_view", "granted");
        drop(InFlightGuard::new());
    }
}
