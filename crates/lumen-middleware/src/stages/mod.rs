//! Pipeline stages.
//!
//! Listed in the order the pipeline runs them:
//!
//! 1. [`response_cache`] - Serve or store cached GET responses (optional)
//! 2. [`context_propagation`] - Correlation id, client IP, raw token
//! 3. [`error_rendering`] - Render failures as `{code, err}`
//! 4. [`rate_limit`] - Token bucket per client IP
//! 5. [`authentication`] - Verify the bearer token
//! 6. [`permission`] - Resolve the target and check the ACL (per route)
//! 7. [`content_type`] - Default `Content-Type: application/json`

pub mod authentication;
pub mod content_type;
pub mod context_propagation;
pub mod error_rendering;
pub mod permission;
pub mod rate_limit;
pub mod response_cache;

pub use authentication::{AuthRequirement, AuthenticationMiddleware};
pub use content_type::ContentTypeMiddleware;
pub use context_propagation::ContextPropagationMiddleware;
pub use error_rendering::ErrorRenderingMiddleware;
pub use permission::{Locators, PermissionGuard, PermissionMiddleware};
pub use rate_limit::{
    Admission, BucketPolicy, InMemoryBuckets, RateLimitKey, RateLimitMiddleware, RateLimitStore,
};
pub use response_cache::{CachedResponse, ResponseCacheMiddleware};
