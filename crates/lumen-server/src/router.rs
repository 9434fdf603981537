//! Request routing and path matching.
//!
//! Routes map a method and a path template to a route name. Templates use
//! `{param}` segments; matched values are returned as [`PathParams`] so the
//! permission stage and handlers can read them from request extensions.
//!
//! Routes are tried in registration order and the first match wins, so
//! register literal paths such as `/images/feed` before `/images/{id}`.
//!
//! # Example
//!
//! ```rust
//! use lumen_server::Router;
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.add_route(Method::GET, "/images/{id}", "getImage");
//! router.add_route(Method::POST, "/images", "uploadImage");
//!
//! let m = router.match_route(&Method::GET, "/images/abc").unwrap();
//! assert_eq!(m.name(), "getImage");
//! assert_eq!(m.param("id"), Some("abc"));
//! ```

use http::Method;
use lumen_middleware::PathParams;

/// A matched route with extracted path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    name: String,
    params: PathParams,
}

impl RouteMatch {
    /// Creates a new route match.
    #[must_use]
    pub fn new(name: impl Into<String>, params: PathParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Returns the route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns a specific path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Consumes the match, returning its parameters.
    #[must_use]
    pub fn into_params(self) -> PathParams {
        self.params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    segments: Vec<PathSegment>,
    name: String,
    pattern: String,
}

impl Route {
    fn new(method: Method, pattern: &str, name: impl Into<String>) -> Self {
        Self {
            method,
            segments: Self::parse_segments(pattern),
            name: name.into(),
            pattern: pattern.to_string(),
        }
    }

    fn parse_segments(pattern: &str) -> Vec<PathSegment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(s.to_string()),
            })
            .collect()
    }

    fn match_path(&self, path: &str) -> Option<PathParams> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::new();

        for (pattern, actual) in self.segments.iter().zip(path_segments) {
            match pattern {
                PathSegment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                PathSegment::Param(name) => params.insert(name.clone(), actual),
            }
        }

        Some(params)
    }
}

/// HTTP request router.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Adds a route.
    pub fn add_route(&mut self, method: Method, pattern: impl AsRef<str>, name: impl Into<String>) {
        self.routes.push(Route::new(method, pattern.as_ref(), name));
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Matches an incoming request to a route.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route
                    .match_path(path)
                    .map(|params| RouteMatch::new(&route.name, params))
            })
    }

    /// Checks if a route name is registered.
    #[must_use]
    pub fn has_route(&self, name: &str) -> bool {
        self.routes.iter().any(|r| r.name == name)
    }

    /// Returns the path template registered under `name`.
    #[must_use]
    pub fn pattern(&self, name: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.pattern.as_str())
    }

    /// Returns all registered route names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_match_simple_path() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images", "listImages");

        let m = router.match_route(&Method::GET, "/images").unwrap();
        assert_eq!(m.name(), "listImages");
        assert_eq!(m.params(), &PathParams::new());
    }

    #[test]
    fn test_router_match_with_param() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images/{id}", "getImage");

        let m = router.match_route(&Method::GET, "/images/abc").unwrap();
        assert_eq!(m.name(), "getImage");
        assert_eq!(m.param("id"), Some("abc"));
    }

    #[test]
    fn test_router_match_with_multiple_params() {
        let mut router = Router::new();
        router.add_route(
            Method::PUT,
            "/collections/{collection}/images/{image}",
            "addToCollection",
        );

        let m = router
            .match_route(&Method::PUT, "/collections/c1/images/abc")
            .unwrap();
        assert_eq!(m.param("collection"), Some("c1"));
        assert_eq!(m.param("image"), Some("abc"));
    }

    #[test]
    fn test_router_match_method_mismatch() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images", "listImages");
        assert!(router.match_route(&Method::POST, "/images").is_none());
    }

    #[test]
    fn test_router_match_segment_count_mismatch() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images/{id}", "getImage");

        assert!(router.match_route(&Method::GET, "/images").is_none());
        assert!(router.match_route(&Method::GET, "/images/abc/extra").is_none());
    }

    #[test]
    fn test_router_first_match_wins() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images/feed", "feed");
        router.add_route(Method::GET, "/images/{id}", "getImage");

        assert_eq!(
            router.match_route(&Method::GET, "/images/feed").unwrap().name(),
            "feed"
        );
        assert_eq!(
            router.match_route(&Method::GET, "/images/abc").unwrap().name(),
            "getImage"
        );
    }

    #[test]
    fn test_router_same_path_different_method() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images/{id}", "getImage");
        router.add_route(Method::DELETE, "/images/{id}", "deleteImage");

        assert_eq!(
            router.match_route(&Method::DELETE, "/images/abc").unwrap().name(),
            "deleteImage"
        );
    }

    #[test]
    fn test_router_trailing_slash_and_root() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/", "root");
        router.add_route(Method::GET, "/images", "listImages");

        assert_eq!(router.match_route(&Method::GET, "/").unwrap().name(), "root");
        assert_eq!(
            router.match_route(&Method::GET, "/images/").unwrap().name(),
            "listImages"
        );
    }

    #[test]
    fn test_router_lookup_by_name() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/images/{id}", "getImage");
        router.add_route(Method::POST, "/images", "uploadImage");

        assert!(router.has_route("getImage"));
        assert!(!router.has_route("unknown"));
        assert_eq!(router.pattern("getImage"), Some("/images/{id}"));
        assert_eq!(router.names().count(), 2);
    }

    #[test]
    fn test_route_match_into_params() {
        let m = RouteMatch::new("getImage", PathParams::new().with("id", "abc"));
        assert_eq!(m.clone().into_params().get("id"), Some("abc"));
        assert_eq!(m.param("missing"), None);
    }
}
