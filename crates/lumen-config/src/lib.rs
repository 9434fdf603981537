//! Typed configuration for the Lumen backend.
//!
//! - TOML and JSON configuration files
//! - `.env` files and environment variable overrides
//! - Strict parsing (unknown fields are rejected)
//! - Layered loading (defaults → file → env)
//!
//! # Overview
//!
//! [`LumenConfig`] is the root type:
//!
//! - [`Mode`] - `local` disables the response cache
//! - [`ServerConfig`] - bind address, shutdown and request timeouts
//! - [`RateLimitConfig`] - token bucket capacity, refill, bucket key
//! - [`ClientIpConfig`] - forwarded headers consulted for the client address
//! - [`CacheConfig`] - response cache switch
//! - [`TelemetryConfigSection`] - metrics and logging
//!
//! # Example
//!
//! ```no_run
//! use lumen_config::{ConfigLoader, DEFAULT_ENV_PREFIX};
//!
//! # fn main() -> Result<(), lumen_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("lumen.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix(DEFAULT_ENV_PREFIX)
//!     .load()?;
//!
//! println!("Server will listen on: {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! mode = "production"
//!
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! request_timeout_secs = 60
//!
//! [rate_limit]
//! capacity = 5
//! refill_tokens = 5
//! window_ms = 1000
//! idle_ttl_ms = 1000
//! key = "client_ip"
//!
//! [client_ip]
//! forwarded_headers = ["X-Forwarded-For", "X-Real-IP"]
//!
//! [cache]
//! enabled = true
//!
//! [telemetry]
//! service_name = "lumen"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Every value can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `LUMEN__MODE=local`
//! - `LUMEN__RATE_LIMIT__CAPACITY=20`
//! - `LUMEN__CLIENT_IP__FORWARDED_HEADERS=CF-Connecting-IP,X-Forwarded-For`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
