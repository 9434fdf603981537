//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections. Every
//! section rejects unknown fields and fills unset fields with defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration section.
///
/// # Example
///
/// ```
/// use lumen_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.request_timeout().as_secs(), 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Overall request deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Externally visible base URL, used for links in created-resource bodies.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_secs: default_request_timeout(),
            public_url: default_public_url(),
        }
    }
}

impl ServerConfig {
    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Returns the overall request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Operating mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Local development. The response cache is disabled.
    Local,
    /// Normal operation.
    #[default]
    Production,
}

/// What identifies a rate limit bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyKind {
    /// One bucket per client IP.
    #[default]
    ClientIp,
    /// One bucket for all callers.
    Global,
}

/// Rate limit configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket capacity (burst size).
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens regained per window.
    #[serde(default = "default_capacity")]
    pub refill_tokens: u32,

    /// Refill window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Idle time after which a bucket is evicted, in milliseconds.
    #[serde(default = "default_window_ms")]
    pub idle_ttl_ms: u64,

    /// Bucket key.
    #[serde(default)]
    pub key: RateLimitKeyKind,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            refill_tokens: default_capacity(),
            window_ms: default_window_ms(),
            idle_ttl_ms: default_window_ms(),
            key: RateLimitKeyKind::default(),
        }
    }
}

impl RateLimitConfig {
    /// Returns the refill window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Returns the idle bucket TTL.
    #[must_use]
    pub const fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    /// Returns how long an empty bucket takes to refill completely, in
    /// milliseconds. Saturates at `u64::MAX`.
    #[must_use]
    pub fn full_refill_ms(&self) -> u64 {
        self.checked_full_refill_ms().unwrap_or(u64::MAX)
    }

    /// Like [`full_refill_ms`](Self::full_refill_ms), but `None` when
    /// `capacity * window_ms` overflows.
    #[must_use]
    pub fn checked_full_refill_ms(&self) -> Option<u64> {
        let refill = u64::from(self.refill_tokens.max(1));
        u64::from(self.capacity)
            .checked_mul(self.window_ms)
            .map(|total| total.div_ceil(refill))
    }
}

fn default_capacity() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    1000
}

/// Client IP derivation section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientIpConfig {
    /// Forwarded headers to consult, in priority order.
    #[serde(default = "default_forwarded_headers")]
    pub forwarded_headers: Vec<String>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            forwarded_headers: default_forwarded_headers(),
        }
    }
}

fn default_forwarded_headers() -> Vec<String> {
    vec!["X-Forwarded-For".to_string(), "X-Real-IP".to_string()]
}

/// Response cache section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Enable the response cache on cacheable routes.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics collection and export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log filter (e.g. "info" or "lumen_middleware=debug,hyper=warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for log fields.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts this section into the telemetry crate's configuration.
    #[must_use]
    pub fn to_telemetry_config(&self) -> lumen_telemetry::TelemetryConfig {
        let logging = lumen_telemetry::LogConfig {
            enabled: self.logging.enabled,
            level: self.logging.level.clone(),
            json_format: self.logging.format == LogFormat::Json,
            span_events: self.logging.format == LogFormat::Pretty,
            file_line_info: self.logging.include_location,
            include_target: true,
            service_name: self.service_name.clone(),
        };

        lumen_telemetry::TelemetryConfig::builder()
            .service_name(&self.service_name)
            .environment(&self.environment)
            .metrics(lumen_telemetry::MetricsConfig {
                enabled: self.metrics.enabled,
                addr: self.metrics.addr.clone(),
            })
            .logging(logging)
            .build()
    }
}

fn default_service_name() -> String {
    "lumen".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_server_config_deserialize() {
        let toml = r#"
            http_addr = "127.0.0.1:3000"
            shutdown_timeout_secs = 60
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:3000");
        assert_eq!(config.shutdown_timeout_secs, 60);
        // Defaults applied
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_server_config_unknown_field_rejected() {
        let toml = r#"
            http_addr = "127.0.0.1:3000"
            max_connections = 10
        "#;
        let result: Result<ServerConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_rate_limit_defaults() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.capacity, 5);
        assert_eq!(config.refill_tokens, 5);
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.full_refill_ms(), 1000);
        assert_eq!(config.key, RateLimitKeyKind::ClientIp);
    }

    #[test]
    fn test_full_refill_rounds_up() {
        let config = RateLimitConfig {
            capacity: 10,
            refill_tokens: 3,
            window_ms: 1000,
            ..RateLimitConfig::default()
        };
        assert_eq!(config.full_refill_ms(), 3334);
    }

    #[test]
    fn test_full_refill_saturates_on_overflow() {
        let config = RateLimitConfig {
            capacity: 5,
            window_ms: u64::MAX / 2,
            ..RateLimitConfig::default()
        };
        assert_eq!(config.checked_full_refill_ms(), None);
        assert_eq!(config.full_refill_ms(), u64::MAX);
    }

    #[test]
    fn test_mode_and_key_deserialize() {
        let mode: Mode = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(mode, Mode::Local);

        let key: RateLimitKeyKind = serde_json::from_str(r#""global""#).unwrap();
        assert_eq!(key, RateLimitKeyKind::Global);
        let key: RateLimitKeyKind = serde_json::from_str(r#""client_ip""#).unwrap();
        assert_eq!(key, RateLimitKeyKind::ClientIp);
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }

    #[test]
    fn test_telemetry_conversion() {
        let section = TelemetryConfigSection {
            service_name: "lumen-images".to_string(),
            logging: LoggingConfig {
                format: LogFormat::Pretty,
                level: "debug".to_string(),
                ..LoggingConfig::default()
            },
            ..TelemetryConfigSection::default()
        };

        let config = section.to_telemetry_config();
        assert_eq!(config.service_name, "lumen-images");
        assert!(!config.logging.json_format);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.service_name, "lumen-images");
        assert_eq!(config.metrics.addr, "0.0.0.0:9090");
    }
}
