//! Request routing: map path patterns and HTTP methods to routes.
//!
//! Route paths are `/`-separated patterns, stored without leading or trailing
//! slashes:
//!
//! | Segment  | Matches                                     |
//! |----------|---------------------------------------------|
//! | `users`  | exactly `users`                             |
//! | `:id`    | any single segment, captured as `id`        |
//! | `*`      | the rest of the path, including nothing     |
//!
//! Patterns are tried in registration order and the first one that has a route
//! for the request method (or for every method) and matches the path wins.
//!
//! Routers nest: [`Router::route`] mounts a router below a prefix, and the
//! nested router matches against the part of the path its parent left over.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::context::Extensions;
use crate::http::{Method, Request, Response, StatusCode};

mod files;
mod route;

pub use files::content_type_for;
pub use route::{Handler, HandlerError, HandlerResult, Route};

/// Errors produced when registering routes.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("a {method} route for /{path} already exists")]
    Exists { method: Method, path: String },

    #[error("static folder {} does not exist", .0.display())]
    FolderNotFound(PathBuf),

    #[error("file {} does not exist", .0.display())]
    FileNotFound(PathBuf),
}

// A single path segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Parameter(String),
    Wildcard,
}

// Compiled route path.
#[derive(Debug, Clone)]
struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(path: &str) -> Self {
        let raw = normalize(path).to_owned();
        let segments = raw
            .split('/')
            .map(|s| {
                if s == "*" {
                    Segment::Wildcard
                } else if let Some(name) = s.strip_prefix(':') {
                    Segment::Parameter(name.to_owned())
                } else {
                    Segment::Static(s.to_owned())
                }
            })
            .collect();
        Self { raw, segments }
    }

    // `path` is a request sub-path, already without surrounding slashes.
    fn matches(&self, path: &str) -> bool {
        let requested: Vec<&str> = path.split('/').collect();
        if requested.len() < self.segments.len() {
            return false;
        }

        for (index, part) in requested.iter().enumerate() {
            match self.segments.get(index) {
                None => return false,
                Some(Segment::Wildcard) => return true,
                Some(Segment::Parameter(_)) => {}
                Some(Segment::Static(expected)) => {
                    if expected != part {
                        return false;
                    }
                }
            }
        }
        true
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

// Routes registered under one pattern.
enum RouteEntry {
    // a route that accepts every method
    Any(Route),
    ByMethod(HashMap<Method, Route>),
}

impl RouteEntry {
    fn route_for(&self, method: Method) -> Option<&Route> {
        match self {
            Self::Any(route) => Some(route),
            Self::ByMethod(routes) => routes.get(&method),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Any(_) => 1,
            Self::ByMethod(routes) => routes.len(),
        }
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```
/// use spindle::router::Router;
///
/// let mut users = Router::new();
/// users.get(":id", |req, res, _| {
///     res.text(format!("user {}", req.path_param("id").unwrap_or("?")));
///     Ok(())
/// }).unwrap();
///
/// let mut router = Router::new();
/// router.get("", |_, res, _| {
///     res.html("<h1>home</h1>");
///     Ok(())
/// }).unwrap();
/// router.route("users", users).unwrap();
///
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<(Pattern, RouteEntry)>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// ```
    /// use spindle::router::Router;
    ///
    /// assert!(Router::new().is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route` under `path`.
    ///
    /// A path holds either one route for every method or one route per method.
    ///
    /// # Errors
    ///
    /// [`RouteError::Exists`] when the path already has a route for every
    /// method, already has a route for `route`'s method, or already has any
    /// route and `route` is for every method.
    pub fn add_route(&mut self, path: &str, route: Route) -> Result<(), RouteError> {
        let path = normalize(path);
        let method = route.method();

        let Some((_, entry)) = self.routes.iter_mut().find(|(p, _)| p.raw == path) else {
            let entry = if method == Method::All {
                RouteEntry::Any(route)
            } else {
                RouteEntry::ByMethod(HashMap::from([(method, route)]))
            };
            self.routes.push((Pattern::parse(path), entry));
            return Ok(());
        };

        match entry {
            RouteEntry::Any(_) => Err(RouteError::Exists {
                method: Method::All,
                path: path.to_owned(),
            }),
            RouteEntry::ByMethod(routes) => {
                if method == Method::All || routes.contains_key(&method) {
                    return Err(RouteError::Exists {
                        method,
                        path: path.to_owned(),
                    });
                }
                routes.insert(method, route);
                Ok(())
            }
        }
    }

    /// Registers `route` for `path` and everything below it.
    pub fn add_any_route(&mut self, path: &str, route: Route) -> Result<(), RouteError> {
        let path = if path.ends_with("/*") {
            path.to_owned()
        } else if path.ends_with('/') {
            format!("{path}*")
        } else {
            format!("{path}/*")
        };
        self.add_route(&path, route)
    }

    /// Registers a `GET` handler.
    ///
    /// # Arguments
    ///
    /// - `path`: route path, e.g. `"users"`, `"users/:id"` or `"files/*"`.
    /// - `handler`: called with the request, the response to fill in and the
    ///   route's parameters.
    pub fn get<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Get, handler))
    }

    /// Registers a `POST` handler.
    pub fn post<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Post, handler))
    }

    /// Registers a `PUT` handler.
    pub fn put<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Put, handler))
    }

    /// Registers a `DELETE` handler.
    pub fn delete<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Delete, handler))
    }

    /// Registers a `HEAD` handler.
    pub fn head<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Head, handler))
    }

    /// Registers a `PATCH` handler.
    pub fn patch<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Patch, handler))
    }

    /// Registers an `OPTIONS` handler.
    pub fn options<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::Options, handler))
    }

    /// Registers a handler for every method.
    pub fn all<F>(&mut self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&Request, &mut Response, &Extensions) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_route(path, Route::new(Method::All, handler))
    }

    /// Mounts `router` below `path`. Mounting at `""` hands it every request.
    pub fn route(&mut self, path: &str, router: Router) -> Result<(), RouteError> {
        self.add_any_route(path, Route::router(router))
    }

    /// Serves the files in `folder` below `path`.
    ///
    /// A request for `path/css/site.css` reads `folder/css/site.css`. Missing
    /// files, and paths with `..` segments, get `404 File not found.`.
    pub fn get_static(&mut self, path: &str, folder: impl Into<PathBuf>) -> Result<(), RouteError> {
        self.add_any_route(path, Route::static_dir(folder)?)
    }

    /// Serves a single file at `path`, or `default` when the file is missing.
    pub fn get_file(
        &mut self,
        path: &str,
        file: impl Into<PathBuf>,
        default: Option<String>,
    ) -> Result<(), RouteError> {
        self.add_route(path, Route::file(file, default)?)
    }

    /// Return the number of routes registered in this router (not counting
    /// routes of nested routers).
    pub fn len(&self) -> usize {
        self.routes.iter().map(|(_, entry)| entry.len()).sum()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the route path that would handle `request`, if any.
    pub fn route_path_for(&self, request: &Request) -> Option<&str> {
        self.resolve(request).map(|(pattern, _)| pattern.raw.as_str())
    }

    fn resolve<'a>(&'a self, request: &Request) -> Option<(&'a Pattern, &'a Route)> {
        let method = request.method();
        let sub_path = request.sub_path();

        self.routes.iter().find_map(|(pattern, entry)| {
            let route = entry.route_for(method)?;
            pattern.matches(sub_path).then_some((pattern, route))
        })
    }

    /// Dispatches `request` to the first matching route.
    ///
    /// The route path of the request is extended with the matched pattern
    /// before the route runs, so handlers see their path parameters. Without a
    /// match the response becomes `404 Not Found`.
    pub fn handle_request(&self, request: &mut Request, response: &mut Response) {
        let Some((pattern, route)) = self.resolve(request) else {
            debug!(method = %request.method(), path = request.path(), "no route");
            response.set_status(StatusCode::NotFound);
            response.text(StatusCode::NotFound.to_string());
            return;
        };

        request.append_route_path(&pattern.raw);
        route.handle(request, response);
    }

    /// Builds the response sent when a request is refused before routing.
    pub fn reject_request(&self, status: StatusCode) -> Response {
        Response::rejection(status)
    }
}
