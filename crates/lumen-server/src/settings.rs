//! Pipeline settings derived from [`LumenConfig`].

use std::sync::Arc;
use std::time::Duration;

use lumen_config::{LumenConfig, Mode, RateLimitKeyKind};
use lumen_middleware::compose::{OperatingMode, PipelineSettings, RateLimitSettings};
use lumen_middleware::stages::{BucketPolicy, InMemoryBuckets, RateLimitKey};

/// Builds the process-wide pipeline settings.
#[must_use]
pub fn pipeline_settings(config: &LumenConfig) -> PipelineSettings {
    let rate_limit = config.rate_limit.enabled.then(|| RateLimitSettings {
        policy: BucketPolicy::new(
            config.rate_limit.capacity,
            config.rate_limit.refill_tokens,
            config.rate_limit.window(),
        ),
        key: match config.rate_limit.key {
            RateLimitKeyKind::ClientIp => RateLimitKey::ClientIp,
            RateLimitKeyKind::Global => RateLimitKey::Global,
        },
    });

    PipelineSettings {
        mode: match config.mode {
            Mode::Local => OperatingMode::Local,
            Mode::Production => OperatingMode::Production,
        },
        deadline: config.server.request_timeout(),
        rate_limit,
        forwarded_headers: config.client_ip.forwarded_headers.clone(),
        cache_enabled: config.cache.enabled,
    }
}

/// Builds the in-memory bucket store shared by every route.
///
/// The idle TTL never undercuts a full refill, so evicting a bucket cannot
/// hand a caller more tokens than waiting would have.
#[must_use]
pub fn bucket_store(config: &LumenConfig) -> Arc<InMemoryBuckets> {
    let full_refill = Duration::from_millis(config.rate_limit.full_refill_ms());
    Arc::new(InMemoryBuckets::new(config.rate_limit.idle_ttl().max(full_refill)))
}
