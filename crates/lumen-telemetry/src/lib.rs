//! Observability for the Lumen request pipeline.
//!
//! - **Logging**: structured logs via `tracing-subscriber`, JSON in production
//!   and pretty-printed in development
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `lumen_requests_total` | Counter | `route`, `status` | Total request count |
//! | `lumen_request_duration_seconds` | Histogram | `route` | Request latency |
//! | `lumen_in_flight_requests` | Gauge | - | Currently processing requests |
//! | `lumen_rate_limited_total` | Counter | - | Requests rejected with 429 |
//! | `lumen_cache_lookups_total` | Counter | `result` | Response cache hits and misses |
//! | `lumen_auth_outcomes_total` | Counter | `outcome` | Authentication results |
//! | `lumen_permission_decisions_total` | Counter | `level`, `outcome` | Permission resolver decisions |
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("lumen-api")
//!     .metrics_addr("0.0.0.0:9090")
//!     .build();
//!
//! init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use self::metrics::{init_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::builder()
            .service_name("test-service")
            .environment("test")
            .build();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.environment, "test");
    }

    #[test]
    fn test_init_with_everything_disabled() {
        let mut config = TelemetryConfig::default();
        config.logging.enabled = false;
        config.metrics.enabled = false;
        assert!(init_telemetry(&config).is_ok());
    }
}
