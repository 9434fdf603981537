//! # Lumen Middleware
//!
//! Request pipeline for the Lumen photo-sharing backend.
//!
//! Every inbound request passes through a fixed-order chain that decides who
//! the caller is, whether they may act on the target resource, how fast they
//! may go, and whether a cached answer can be returned instead of doing the
//! work.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → [Cache] → Context → ErrorRendering → RateLimit → Authentication
//!                                                                 ↓
//! Response ←──────────── {code, err} ←── ContentType ← [Permission] ← Handler
//! ```
//!
//! | Slot | Stage               | Purpose                                     |
//! |------|---------------------|---------------------------------------------|
//! | 1    | Response Cache      | Replay or store 200 GET responses (opt-in)  |
//! | 2    | Context Propagation | Correlation id, client IP, raw bearer token |
//! | 3    | Error Rendering     | Uniform `{code, err}` bodies, panic capture |
//! | 4    | Rate Limit          | Token bucket per client IP                  |
//! | 5    | Authentication      | Verify the token, optional or required      |
//! | 6    | Permission          | Resolve target, check ACL (per route)       |
//! | 7    | Content Type        | Default to `application/json`               |
//!
//! The request context is passed by value and only ever extended: a stage
//! that tries to overwrite a field already set fails the request.
//!
//! ## Example
//!
//! ```
//! use lumen_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 7);
//! assert_eq!(stages[0].name(), "response_cache");
//! assert_eq!(stages[6].name(), "content_type");
//! ```

#![doc(html_root_url = "https://docs.rs/lumen-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client_ip;
pub mod compose;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use client_ip::ClientIpResolver;
pub use compose::{
    compose, Collaborators, OperatingMode, PipelineSettings, RateLimitSettings, RoutePolicy,
};
pub use middleware::{BoxFuture, BoxHandler, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{PathParams, Request, ResolvedTarget, Response, ResponseExt};
