//! Rate limiting stage.
//!
//! Bounds request throughput per caller with a token bucket. Runs before
//! authentication, so buckets are keyed by client IP rather than by a
//! not-yet-verified identity.
//!
//! ## Algorithm
//!
//! Each bucket holds up to `capacity` tokens and regains `refill_tokens`
//! every `window`, continuously. A request consumes one token; a request that
//! finds less than one token is rejected with 429 and consumes nothing.
//!
//! ## Storage
//!
//! Bucket state lives behind [`RateLimitStore`] so in-memory and shared
//! backends are interchangeable. [`InMemoryBuckets`] locks per key and evicts
//! buckets that have been idle long enough to be full again, which bounds
//! memory without changing any admission decision.
//!
//! ## Example
//!
//! ```ignore
//! use lumen_middleware::stages::rate_limit::{BucketPolicy, RateLimitMiddleware};
//!
//! let rate_limit = RateLimitMiddleware::builder()
//!     .policy(BucketPolicy::per_second(5))
//!     .per_ip()
//!     .build();
//! ```

use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use async_trait::async_trait;
use dashmap::DashMap;
use lumen_core::{AuthContext, CollaboratorError, PipelineError, PipelineResult};
use lumen_telemetry::metrics::record_rate_limited;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    capacity: u32,
    refill_tokens: u32,
    window: Duration,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self::per_second(5)
    }
}

impl BucketPolicy {
    /// Creates a policy of `capacity` tokens refilled at `refill_tokens` per
    /// `window`.
    ///
    /// Zero values are raised to the smallest usable value.
    #[must_use]
    pub fn new(capacity: u32, refill_tokens: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_tokens: refill_tokens.max(1),
            window: window.max(Duration::from_millis(1)),
        }
    }

    /// Creates a policy allowing `n` requests per second with a burst of `n`.
    #[must_use]
    pub fn per_second(n: u32) -> Self {
        Self::new(n, n, Duration::from_secs(1))
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.refill_tokens) / self.window.as_secs_f64()
    }

    /// Returns how long an empty bucket takes to become full.
    #[must_use]
    pub fn full_refill_after(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.capacity) / self.refill_per_sec())
    }
}

/// Outcome of a bucket acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// A token was consumed.
    Allowed {
        /// Whole tokens left in the bucket.
        remaining: u32,
    },
    /// The bucket was empty. Nothing was consumed.
    Limited {
        /// Time until one token is available.
        retry_after: Duration,
    },
}

/// Backing store for token buckets.
///
/// `acquire` must be atomic per key: concurrent callers never both consume
/// the last token.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Attempts to take one token from the bucket for `key`.
    async fn acquire(&self, key: &str, policy: &BucketPolicy)
        -> Result<Admission, CollaboratorError>;
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(policy: &BucketPolicy, now: Instant) -> Self {
        Self {
            tokens: f64::from(policy.capacity),
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, policy: &BucketPolicy, now: Instant) -> Admission {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * policy.refill_per_sec()).min(f64::from(policy.capacity));
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let remaining = self.tokens.floor() as u32;
            Admission::Allowed { remaining }
        } else {
            let deficit = 1.0 - self.tokens;
            Admission::Limited {
                retry_after: Duration::from_secs_f64(deficit / policy.refill_per_sec()),
            }
        }
    }
}

/// In-process bucket table.
#[derive(Debug)]
pub struct InMemoryBuckets {
    buckets: DashMap<String, TokenBucket>,
    idle_ttl: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for InMemoryBuckets {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl InMemoryBuckets {
    /// Creates a table that evicts buckets idle for `idle_ttl`.
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            idle_ttl,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Returns the number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no buckets are live.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Removes buckets idle for at least the TTL and returns how many were
    /// removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < self.idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < self.idle_ttl {
                return;
            }
            *last = now;
        }
        let evicted = self.sweep(now);
        if evicted > 0 {
            tracing::trace!(evicted, "evicted idle rate limit buckets");
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryBuckets {
    async fn acquire(
        &self,
        key: &str,
        policy: &BucketPolicy,
    ) -> Result<Admission, CollaboratorError> {
        let now = Instant::now();
        self.maybe_sweep(now);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(policy, now));
        Ok(bucket.try_acquire(policy, now))
    }
}

/// What identifies a caller's bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateLimitKey {
    /// One bucket per derived client IP.
    #[default]
    ClientIp,
    /// A single bucket shared by all callers.
    Global,
}

/// Rate limiting stage.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    store: Arc<dyn RateLimitStore>,
    policy: BucketPolicy,
    key: RateLimitKey,
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("policy", &self.policy)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Default)]
pub struct RateLimitBuilder {
    store: Option<Arc<dyn RateLimitStore>>,
    policy: BucketPolicy,
    key: RateLimitKey,
}

impl RateLimitBuilder {
    /// Creates a builder with the default policy (5 req/s per IP).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bucket policy.
    #[must_use]
    pub fn policy(mut self, policy: BucketPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uses the client IP as the bucket key.
    #[must_use]
    pub fn per_ip(mut self) -> Self {
        self.key = RateLimitKey::ClientIp;
        self
    }

    /// Uses a single bucket for all callers.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.key = RateLimitKey::Global;
        self
    }

    /// Sets the bucket key.
    #[must_use]
    pub fn key(mut self, key: RateLimitKey) -> Self {
        self.key = key;
        self
    }

    /// Sets the bucket store. Buckets are only shared between stages that
    /// share a store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the stage. Without an explicit store, an in-memory table is
    /// created that evicts buckets once they would be full again.
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        let policy = self.policy;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryBuckets::new(policy.full_refill_after())));
        RateLimitMiddleware {
            store,
            policy,
            key: self.key,
        }
    }
}

impl RateLimitMiddleware {
    /// Creates a new rate limit builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Returns the bucket policy.
    #[must_use]
    pub fn policy(&self) -> &BucketPolicy {
        &self.policy
    }

    fn bucket_key(&self, ctx: &AuthContext) -> String {
        match self.key {
            RateLimitKey::ClientIp => ctx
                .client_ip()
                .map_or_else(|| "unknown-ip".to_string(), |ip| ip.to_string()),
            RateLimitKey::Global => "global".to_string(),
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: AuthContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let key = self.bucket_key(&ctx);

            match self.store.acquire(&key, &self.policy).await {
                Ok(Admission::Allowed { remaining }) => {
                    tracing::trace!(bucket = %key, remaining, "rate limit admitted");
                    next.run(ctx, request).await
                }
                Ok(Admission::Limited { retry_after }) => {
                    record_rate_limited();
                    Err(PipelineError::rate_limited(retry_after))
                }
                Err(error) => {
                    tracing::warn!(%error, "rate limit store unavailable, admitting request");
                    next.run(ctx, request).await
                }
            }
        })
    }
}
