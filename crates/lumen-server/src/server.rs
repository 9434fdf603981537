//! HTTP server.
//!
//! One tokio task per connection, HTTP/1.1 via hyper. Each request is
//! matched against the route table; the matched route's pipeline runs the
//! stages and then the route's handler. `GET /health` and unmatched paths
//! are answered directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_config::ConfigLoader;
//! use lumen_server::{settings, Server};
//!
//! let config = ConfigLoader::new().with_env_prefix("LUMEN").load()?;
//! let collaborators = Collaborators {
//!     rate_limits: settings::bucket_store(&config),
//!     // verifier, locators, acl, cache ...
//! };
//!
//! let server = Server::builder(collaborators)
//!     .config(&config)
//!     .route(Method::GET, "/images/{id}", "getImage", policy, handler)
//!     .build()?;
//! server.run().await?;
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use lumen_config::LumenConfig;
use lumen_core::{AuthContext, PipelineError, PipelineResult};
use lumen_middleware::compose::{compose, Collaborators, PipelineSettings, RoutePolicy};
use lumen_middleware::{BoxFuture, Pipeline, Request, Response, ResponseExt};
use lumen_telemetry::metrics::record_request;
use lumen_telemetry::InFlightGuard;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::handler::{HandlerResponse, RouteHandler, SharedHandler};
use crate::health::{HealthCheck, HEALTH_PATH};
use crate::router::Router;
use crate::settings::pipeline_settings;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Default bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const UNMATCHED_ROUTE: &str = "unmatched";

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address does not parse.
    #[error("invalid address '{addr}': {source}")]
    InvalidAddress {
        /// The configured address.
        addr: String,
        /// Parse failure.
        #[source]
        source: std::net::AddrParseError,
    },

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The resolved address.
        addr: SocketAddr,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Two routes were registered under the same name.
    #[error("duplicate route name: {0}")]
    DuplicateRoute(String),
}

struct RouteEntry {
    label: String,
    pipeline: Pipeline,
    handler: SharedHandler,
}

/// The Lumen HTTP server.
pub struct Server {
    http_addr: String,
    shutdown_timeout: Duration,
    body_timeout: Duration,
    router: Router,
    routes: HashMap<String, RouteEntry>,
    health: HealthCheck,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("http_addr", &self.http_addr)
            .field("routes", &self.router.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a builder around the shared collaborators.
    #[must_use]
    pub fn builder(collaborators: Collaborators) -> ServerBuilder {
        ServerBuilder::new(collaborators)
    }

    /// Returns the configured bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Returns the route table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the pipeline composed for `name`.
    #[must_use]
    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.routes.get(name).map(|entry| &entry.pipeline)
    }

    /// Returns the health state.
    #[must_use]
    pub fn health(&self) -> &HealthCheck {
        &self.health
    }

    /// Binds the configured address and serves until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr: SocketAddr =
            self.http_addr
                .parse()
                .map_err(|source| ServerError::InvalidAddress {
                    addr: self.http_addr.clone(),
                    source,
                })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serves connections from `listener` until `shutdown` fires, then waits
    /// up to the shutdown timeout for open connections to finish.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, routes = self.router.route_count(), "server listening");
        }

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, remote_addr, shutdown).await {
                                tracing::debug!(%remote_addr, error = %e, "connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        server.health.set_draining();
        drop(listener);

        tracing::info!(
            timeout = ?server.shutdown_timeout,
            active = tracker.active_connections(),
            "waiting for open connections"
        );

        if tokio::time::timeout(server.shutdown_timeout, tracker.wait_for_drain())
            .await
            .is_err()
        {
            tracing::warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            );
        }

        tracing::info!("server stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let server = Arc::clone(&self);
        let service = service_fn(move |req: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req, remote_addr).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                // Finish the in-flight request, then close.
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    async fn handle_request(&self, req: http::Request<Incoming>, remote_addr: SocketAddr) -> Response {
        let (parts, body) = req.into_parts();

        let body = match tokio::time::timeout(self.body_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                tracing::debug!(%remote_addr, error = %e, "failed to read request body");
                return Response::from_error(&PipelineError::validation(
                    "failed to read request body",
                ));
            }
            Err(_elapsed) => return Response::from_error(&PipelineError::Timeout),
        };

        self.dispatch(http::Request::from_parts(parts, Full::new(body)), Some(remote_addr))
            .await
    }

    /// Routes a request whose body has been read.
    ///
    /// `peer_addr` is the transport-level remote address; the context stage
    /// derives the client IP from it and the forwarded headers.
    pub async fn dispatch(&self, mut request: Request, peer_addr: Option<SocketAddr>) -> Response {
        let _in_flight = InFlightGuard::new();
        let started = Instant::now();

        if request.method() == Method::GET && request.uri().path() == HEALTH_PATH {
            return self.handle_health();
        }

        let Some(route_match) = self.router.match_route(request.method(), request.uri().path())
        else {
            tracing::debug!(method = %request.method(), path = request.uri().path(), "no route");
            let response = Response::from_error(&PipelineError::not_found("Not Found"));
            record_request(UNMATCHED_ROUTE, response.status().as_u16(), started.elapsed());
            return response;
        };

        let Some(entry) = self.routes.get(route_match.name()) else {
            let error = PipelineError::internal(format!(
                "route '{}' has no handler",
                route_match.name()
            ));
            tracing::error!(error = %error, "route table out of sync");
            return Response::from_error(&error);
        };

        request.extensions_mut().insert(route_match.into_params());

        let handler = Arc::clone(&entry.handler);
        let response = entry
            .pipeline
            .process(
                peer_addr,
                request,
                move |ctx: AuthContext, request: Request| -> BoxFuture<'static, PipelineResult<Response>> {
                    Box::pin(async move {
                        handler
                            .call(ctx, request)
                            .await
                            .map(HandlerResponse::into_response)
                    })
                },
            )
            .await;

        record_request(&entry.label, response.status().as_u16(), started.elapsed());
        response
    }

    fn handle_health(&self) -> Response {
        let status = self.health.status();
        let code = if status.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        match serde_json::to_vec(&status) {
            Ok(body) => Response::json_bytes(code, Bytes::from(body)),
            Err(_) => Response::json_bytes(code, Bytes::from_static(br#"{"status":"unknown"}"#)),
        }
    }
}

struct PendingRoute {
    method: Method,
    pattern: String,
    name: String,
    policy: RoutePolicy,
    handler: SharedHandler,
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    collaborators: Collaborators,
    settings: PipelineSettings,
    http_addr: String,
    shutdown_timeout: Duration,
    service_name: String,
    version: String,
    routes: Vec<PendingRoute>,
}

impl ServerBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            settings: PipelineSettings::default(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            service_name: "lumen".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            routes: Vec::new(),
        }
    }

    /// Applies the server, pipeline and telemetry sections of `config`.
    ///
    /// The rate limit store is part of the collaborators; build it with
    /// [`bucket_store`](crate::settings::bucket_store) to honour the
    /// configured idle TTL.
    #[must_use]
    pub fn config(mut self, config: &LumenConfig) -> Self {
        self.settings = pipeline_settings(config);
        self.http_addr.clone_from(&config.server.http_addr);
        self.shutdown_timeout = config.server.shutdown_timeout();
        self.service_name.clone_from(&config.telemetry.service_name);
        self
    }

    /// Overrides the pipeline settings.
    #[must_use]
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the service name reported by `/health`.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Registers a route.
    ///
    /// Routes are matched in registration order.
    #[must_use]
    pub fn route<H: RouteHandler>(
        mut self,
        method: Method,
        pattern: impl Into<String>,
        name: impl Into<String>,
        policy: RoutePolicy,
        handler: H,
    ) -> Self {
        self.routes.push(PendingRoute {
            method,
            pattern: pattern.into(),
            name: name.into(),
            policy,
            handler: Arc::new(handler),
        });
        self
    }

    /// Composes every route's pipeline and builds the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateRoute`] if a name is used twice.
    pub fn build(self) -> Result<Server, ServerError> {
        let mut router = Router::new();
        let mut routes = HashMap::with_capacity(self.routes.len());

        for pending in self.routes {
            if routes.contains_key(&pending.name) {
                return Err(ServerError::DuplicateRoute(pending.name));
            }

            let pipeline = compose(&self.collaborators, &self.settings, &pending.policy);
            tracing::debug!(
                route = %pending.name,
                stages = ?pipeline.stage_names(),
                "composed route pipeline"
            );

            router.add_route(pending.method.clone(), &pending.pattern, &pending.name);
            routes.insert(
                pending.name,
                RouteEntry {
                    label: format!("{} {}", pending.method, pending.pattern),
                    pipeline,
                    handler: pending.handler,
                },
            );
        }

        Ok(Server {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            body_timeout: self.settings.deadline,
            router,
            routes,
            health: HealthCheck::new(self.service_name, self.version),
        })
    }
}
