//! # Lumen
//!
//! **Request pipeline for the Lumen photo-sharing backend**
//!
//! Every route runs behind a fixed chain of stages composed from its
//! [`RoutePolicy`](middleware::RoutePolicy):
//!
//! ```text
//! Request → ResponseCache → ContextPropagation → ErrorRendering → RateLimit
//!         → Authentication → Permission → ContentType → Handler
//! ```
//!
//! Stages a policy does not need are left out. Any stage that fails
//! short-circuits the rest and the client receives a single
//! `{"code": <status>, "err": <message>}` body.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lumen::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_defaults().with_env_prefix("LUMEN").load()?;
//!     lumen::init_telemetry(&config)?;
//!
//!     let server = Server::builder(collaborators(&config))
//!         .config(&config)
//!         .route(
//!             Method::GET,
//!             "/images/{id}",
//!             "getImage",
//!             RoutePolicy::guarded(PermissionLevel::CanView, CollectionKind::Images),
//!             FnHandler::new(get_image),
//!         )
//!         .build()?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/lumen/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use lumen_config as config;
pub use lumen_core as core;
pub use lumen_middleware as middleware;
pub use lumen_server as server;
pub use lumen_telemetry as telemetry;

/// Installs logging and metrics as described by the `telemetry` section.
pub fn init_telemetry(
    config: &lumen_config::LumenConfig,
) -> lumen_telemetry::TelemetryResult<()> {
    lumen_telemetry::init_telemetry(&config.telemetry.to_telemetry_config())
}

/// Prelude module for convenient imports.
///
/// ```rust
/// use lumen::prelude::*;
///
/// let policy = RoutePolicy::guarded(PermissionLevel::CanEdit, CollectionKind::Images);
/// let image = ResourceRef::image("abc");
/// assert_eq!(image.to_path(), "/images/abc");
/// # let _ = policy;
/// ```
pub mod prelude {
    pub use http::Method;

    pub use lumen_core::{
        AclChecker, AuthContext, CacheStore, CollectionKind, PermissionLevel, PipelineError,
        PipelineResult, ResourceLocator, ResourceRef, TokenVerdict, TokenVerifier,
    };

    pub use lumen_middleware::stages::{BucketPolicy, InMemoryBuckets, Locators, RateLimitKey};
    pub use lumen_middleware::{
        compose, Collaborators, OperatingMode, Pipeline, PipelineSettings, Request, Response,
        RoutePolicy,
    };

    pub use lumen_config::{ConfigLoader, LumenConfig};

    pub use lumen_server::handler::{json_body, path_param, resolved_target};
    pub use lumen_server::{FnHandler, HandlerResponse, RouteHandler, Server, ShutdownSignal};
}
