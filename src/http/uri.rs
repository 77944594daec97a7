//! Request-target resolution.
//!
//! A request line carries the target in one of four forms (RFC 9112 §3.2):
//! origin (`/path?q`), absolute (`http://host/path`), authority (`host:port`,
//! used by `CONNECT`) and asterisk (`*`). [`RequestTarget::resolve`] turns any of
//! them into an absolute URI using the connection scheme and the `Host` header.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

pub const HTTP_SCHEME: &str = "http";
pub const HTTPS_SCHEME: &str = "https";

/// Errors produced while resolving a request target.
#[derive(Debug, Error)]
pub enum UriError {
    #[error("invalid request target {target:?}: {source}")]
    Parse {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request target has no host")]
    MissingHost,

    #[error("request path is not valid UTF-8 once decoded")]
    PathEncoding,
}

/// A resolved request target.
///
/// The path is percent-decoded and stored without leading or trailing `/`, so the
/// root resource is the empty path. Query keys are unique; a repeated key keeps
/// the last value.
///
/// # Examples
///
/// ```
/// use spindle::http::RequestTarget;
///
/// let target = RequestTarget::resolve("http", "example.com", "/users/42?x=1").unwrap();
/// assert_eq!(target.host(), "example.com");
/// assert_eq!(target.port(), 80);
/// assert_eq!(target.path(), "users/42");
/// assert_eq!(target.query_param("x"), Some("1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: HashMap<String, String>,
}

impl RequestTarget {
    /// Resolves `target` against `scheme` and the `Host` header value.
    pub fn resolve(scheme: &str, host: &str, target: &str) -> Result<Self, UriError> {
        let scheme_host = format!("{scheme}://{host}");

        let absolute = if target == "*" {
            scheme_host
        } else if target.starts_with('/') {
            format!("{scheme_host}{target}")
        } else if has_http_scheme(target) {
            target.to_owned()
        } else {
            // authority form
            format!("{scheme}://{target}")
        };

        Self::parse(&absolute)
    }

    /// Parses an absolute `http`/`https` URI.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let url = Url::parse(uri).map_err(|source| UriError::Parse {
            target: uri.to_owned(),
            source,
        })?;

        let host = url.host_str().ok_or(UriError::MissingHost)?.to_owned();
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == HTTPS_SCHEME { 443 } else { 80 });

        let path = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|_| UriError::PathEncoding)?
            .trim_matches('/')
            .to_owned();

        // later pairs overwrite earlier ones
        let query = url.query_pairs().into_owned().collect();

        Ok(Self {
            scheme: url.scheme().to_owned(),
            host,
            port,
            path,
            query,
        })
    }

    /// Returns the scheme (`http` or `https`).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit port, or the scheme's default.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the decoded path without leading or trailing `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the decoded path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    /// Returns all query parameters.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

fn has_http_scheme(target: &str) -> bool {
    let lower = target.get(..8).unwrap_or(target).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_form() {
        let t = RequestTarget::resolve("http", "localhost:8080", "/a/b/?k=v").unwrap();
        assert_eq!(t.scheme(), "http");
        assert_eq!(t.host(), "localhost");
        assert_eq!(t.port(), 8080);
        assert_eq!(t.path(), "a/b");
        assert_eq!(t.segments().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(t.query_param("k"), Some("v"));
    }

    #[test]
    fn root_is_empty_path() {
        let t = RequestTarget::resolve("https", "example.com", "/").unwrap();
        assert_eq!(t.path(), "");
        assert_eq!(t.port(), 443);
        assert!(t.query().is_empty());
    }

    #[test]
    fn asterisk_form() {
        let t = RequestTarget::resolve("http", "example.com", "*").unwrap();
        assert_eq!(t.host(), "example.com");
        assert_eq!(t.path(), "");
    }

    #[test]
    fn absolute_form_ignores_host_header() {
        let t = RequestTarget::resolve("http", "example.com", "http://other.org:81/x").unwrap();
        assert_eq!(t.host(), "other.org");
        assert_eq!(t.port(), 81);
        assert_eq!(t.path(), "x");
    }

    #[test]
    fn authority_form() {
        let t = RequestTarget::resolve("http", "example.com", "proxy.local:3128").unwrap();
        assert_eq!(t.host(), "proxy.local");
        assert_eq!(t.port(), 3128);
    }

    #[test]
    fn percent_decoding() {
        let t =
            RequestTarget::resolve("http", "h", "/files/my%20doc.txt?name=a%26b&q=x+y").unwrap();
        assert_eq!(t.path(), "files/my doc.txt");
        assert_eq!(t.query_param("name"), Some("a&b"));
        assert_eq!(t.query_param("q"), Some("x y"));
    }

    #[test]
    fn query_last_write_wins() {
        let t = RequestTarget::resolve("http", "h", "/?a=1&a=2&b").unwrap();
        assert_eq!(t.query_param("a"), Some("2"));
        assert_eq!(t.query_param("b"), Some(""));
    }

    #[test]
    fn bad_host_is_an_error() {
        assert!(RequestTarget::resolve("http", "bad host", "/").is_err());
        assert!(RequestTarget::resolve("http", "", "/").is_err());
    }
}
