//! Health endpoint.
//!
//! `GET /health` is answered by the server itself, outside every route
//! pipeline, so probes are never rate limited or cached. Once graceful
//! shutdown starts the endpoint reports `draining` with a 503, which tells
//! load balancers to stop sending traffic.
//!
//! # Example
//!
//! ```rust
//! use lumen_server::HealthCheck;
//!
//! let health = HealthCheck::new("lumen", "0.1.0");
//! assert!(health.status().is_healthy());
//!
//! health.set_draining();
//! assert!(!health.status().is_healthy());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Body of the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    status: String,
    service: String,
    version: String,
    uptime_seconds: u64,
}

impl HealthStatus {
    fn new(status: &str, service: &str, version: &str, uptime: Duration) -> Self {
        Self {
            status: status.to_string(),
            service: service.to_string(),
            version: version.to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Returns the status string (`healthy` or `draining`).
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    /// Returns whether the server is accepting traffic.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Liveness state shared between the accept loop and request tasks.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    start_time: Instant,
    draining: Arc<AtomicBool>,
}

impl HealthCheck {
    /// Creates a new health check.
    #[must_use]
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            start_time: Instant::now(),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let status = if self.draining.load(Ordering::SeqCst) {
            "draining"
        } else {
            "healthy"
        };
        HealthStatus::new(status, &self.service, &self.version, self.uptime())
    }

    /// Marks the server as shutting down.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Returns the server uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}
