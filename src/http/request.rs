//! A fully received HTTP/1.1 request.

use std::collections::HashMap;

use bytes::Bytes;

use super::headers::names::{CONNECTION, CONTENT_LENGTH};
use super::{Headers, Method, RequestTarget, Version};
use crate::context::PathParams;

/// A fully received HTTP/1.1 request.
///
/// Produced by [`RequestParser`](super::RequestParser). While the request is
/// routed, it also tracks the route path matched so far, which nested routers
/// use to find the part of the path that is theirs.
///
/// # Examples
///
/// ```
/// use spindle::http::{Headers, Method, Request, RequestTarget, Version};
///
/// let target = RequestTarget::resolve("http", "localhost", "/api/users/7?full=1").unwrap();
/// let mut request = Request::new(Method::Get, target, Version::HTTP_11, Headers::new(), Default::default());
///
/// request.append_route_path("api/*");
/// assert_eq!(request.sub_path(), "users/7");
///
/// request.append_route_path("users/:id");
/// assert_eq!(request.route_path(), "api/users/:id");
/// assert_eq!(request.path_param("id"), Some("7"));
/// assert_eq!(request.query_param("full"), Some("1"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: RequestTarget,
    version: Version,
    headers: Headers,
    body: Bytes,
    route_path: String,
    path_params: PathParams,
}

impl Request {
    pub fn new(
        method: Method,
        target: RequestTarget,
        version: Version,
        headers: Headers,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            target,
            version,
            headers,
            body,
            route_path: String::new(),
            path_params: PathParams::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the resolved request target.
    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    /// Returns the decoded path without leading or trailing `/`.
    pub fn path(&self) -> &str {
        self.target.path()
    }

    pub fn query(&self) -> &HashMap<String, String> {
        self.target.query()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.target.query_param(key)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a header value (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Deserializes a JSON body.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// Returns the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get(CONTENT_LENGTH)?.parse().ok()
    }

    /// Returns `true` if the client allows the connection to stay open.
    ///
    /// `Connection: close` always closes. HTTP/1.0 stays open only with
    /// `Connection: keep-alive`; later versions stay open by default.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token(CONNECTION, "close") {
            return false;
        }
        if self.version <= Version::HTTP_10 {
            return self.headers.has_token(CONNECTION, "keep-alive");
        }
        true
    }

    /// Returns the route path matched so far, e.g. `api/users/:id`.
    pub fn route_path(&self) -> &str {
        &self.route_path
    }

    /// Replaces the route path and recomputes the path parameters from it.
    pub fn set_route_path(&mut self, route_path: impl Into<String>) {
        self.route_path = route_path.into();
        self.path_params = PathParams::capture(&self.route_path, self.target.path());
    }

    /// Extends the route path with the pattern matched by a nested router.
    ///
    /// A trailing `*` on the current route path marks where the nested router
    /// was mounted; it is replaced by `route_path`.
    pub fn append_route_path(&mut self, route_path: &str) {
        let base = self.route_path.strip_suffix('*').unwrap_or(&self.route_path);
        let joined = format!("{base}{route_path}");
        self.set_route_path(joined);
    }

    /// Returns the part of the path not yet consumed by the route path.
    ///
    /// One leading segment is dropped per `/` in the route path, so a router
    /// mounted at `api/*` sees `api/users/7` as `users/7`.
    pub fn sub_path(&self) -> &str {
        let mut sub = self.target.path();
        if self.route_path.is_empty() {
            return sub;
        }
        for _ in 0..self.route_path.matches('/').count() {
            match sub.find('/') {
                Some(index) => sub = &sub[index + 1..],
                None => break,
            }
        }
        sub
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    /// Returns a `:name` path parameter captured by the route path.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }
}
