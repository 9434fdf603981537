//! # Lumen Server
//!
//! HTTP front end for the Lumen photo-sharing backend.
//!
//! - hyper 1.x accept loop, one tokio task per connection
//! - Route table with `{param}` segments; each route gets its own
//!   [`Pipeline`](lumen_middleware::Pipeline) composed from a
//!   [`RoutePolicy`](lumen_middleware::RoutePolicy)
//! - Thin [`RouteHandler`]s returning [`HandlerResponse`] or a pipeline error
//! - `GET /health`, answered outside the pipelines
//! - Graceful shutdown on SIGTERM or SIGINT
//!
//! Unmatched paths get `{"code": 404, "err": "Not Found"}`.

#![doc(html_root_url = "https://docs.rs/lumen-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod handler;
pub mod health;
pub mod router;
pub mod server;
pub mod settings;
pub mod shutdown;

pub use handler::{FnHandler, HandlerResponse, RouteHandler};
pub use health::{HealthCheck, HealthStatus};
pub use router::{RouteMatch, Router};
pub use server::{Server, ServerBuilder, ServerError};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
