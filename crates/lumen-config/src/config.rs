//! Main configuration types.
//!
//! This module provides the top-level [`LumenConfig`] struct and its builder.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{
    CacheConfig, ClientIpConfig, ConfigError, LogFormat, Mode, RateLimitConfig, ServerConfig,
    TelemetryConfigSection,
};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Complete Lumen backend configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use lumen_config::{LumenConfig, Mode};
///
/// let config = LumenConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.mode, Mode::Production);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LumenConfig {
    /// Operating mode.
    #[serde(default)]
    pub mode: Mode,

    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Client IP derivation.
    #[serde(default)]
    pub client_ip: ClientIpConfig,

    /// Response cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl LumenConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use lumen_config::{LumenConfig, ServerConfig};
    ///
    /// let config = LumenConfig::builder()
    ///     .server(ServerConfig {
    ///         http_addr: "127.0.0.1:3000".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    #[must_use]
    pub fn builder() -> LumenConfigBuilder {
        LumenConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A socket address does not parse
    /// - The request timeout is zero
    /// - A rate limit value is zero, or idle buckets would be evicted before
    ///   they refill
    /// - A forwarded header name is not a valid HTTP header name
    /// - The log filter contains an unknown level
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_secs",
                "must be at least 1",
            ));
        }

        if self.telemetry.metrics.enabled
            && self.telemetry.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        self.validate_rate_limit()?;

        for name in &self.client_ip.forwarded_headers {
            if !is_header_name(name) {
                return Err(ConfigError::invalid_value(
                    "client_ip.forwarded_headers",
                    format!("invalid header name: {name:?}"),
                ));
            }
        }

        validate_log_filter(&self.telemetry.logging.level)
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        let rate_limit = &self.rate_limit;
        if !rate_limit.enabled {
            return Ok(());
        }

        for (field, value) in [
            ("rate_limit.capacity", u64::from(rate_limit.capacity)),
            ("rate_limit.refill_tokens", u64::from(rate_limit.refill_tokens)),
            ("rate_limit.window_ms", rate_limit.window_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be at least 1"));
            }
        }

        let Some(full_refill) = rate_limit.checked_full_refill_ms() else {
            return Err(ConfigError::invalid_value(
                "rate_limit.window_ms",
                "capacity * window_ms overflows",
            ));
        };
        if rate_limit.idle_ttl_ms < full_refill {
            return Err(ConfigError::invalid_value(
                "rate_limit.idle_ttl_ms",
                format!("must be at least the full refill time ({full_refill}ms)"),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Local mode (no response cache), pretty debug logs with source
    /// locations, and no metrics exporter.
    ///
    /// # Example
    ///
    /// ```
    /// use lumen_config::{LumenConfig, Mode};
    ///
    /// let config = LumenConfig::development();
    /// assert_eq!(config.mode, Mode::Local);
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.mode = Mode::Local;
        config.server.http_addr = "127.0.0.1:8080".to_string();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config.telemetry.environment = "development".to_string();

        config
    }

    /// Create a production configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use lumen_config::{LogFormat, LumenConfig};
    ///
    /// let config = LumenConfig::production();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.mode = Mode::Production;
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config
    }
}

// RFC 9110 token characters.
fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

fn validate_log_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.trim().is_empty() {
        return Err(ConfigError::invalid_value(
            "telemetry.logging.level",
            "must not be empty",
        ));
    }

    for directive in filter.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        // A bare directive is either a level or a target name.
        let Some((_, level)) = directive.rsplit_once('=') else {
            continue;
        };
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                format!("unknown level in directive: {directive}"),
            ));
        }
    }

    Ok(())
}

/// Builder for [`LumenConfig`].
#[derive(Debug, Default)]
pub struct LumenConfigBuilder {
    mode: Option<Mode>,
    server: Option<ServerConfig>,
    rate_limit: Option<RateLimitConfig>,
    client_ip: Option<ClientIpConfig>,
    cache: Option<CacheConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl LumenConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operating mode.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the rate limit configuration.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set the client IP configuration.
    #[must_use]
    pub fn client_ip(mut self, client_ip: ClientIpConfig) -> Self {
        self.client_ip = Some(client_ip);
        self
    }

    /// Set the cache configuration.
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> LumenConfig {
        LumenConfig {
            mode: self.mode.unwrap_or_default(),
            server: self.server.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            client_ip: self.client_ip.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<LumenConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
