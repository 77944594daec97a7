//! HTTP header map with case-insensitive name lookup.
//!
//! Header names are case-insensitive per [RFC 9110 §5]. Each name carries a
//! single value; setting a name again replaces the value in place.

use std::fmt;

use thiserror::Error;

/// Well-known header names used by the server core.
pub mod names {
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const DATE: &str = "Date";
    pub const HOST: &str = "Host";
    pub const KEEP_ALIVE: &str = "Keep-Alive";
    pub const SERVER: &str = "Server";
}

/// Errors produced when decoding a single `name: value` header line.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("malformed header field: {0}")]
    Syntax(#[from] httparse::Error),

    #[error("header line is not a single field")]
    NotAField,

    #[error("header value is not valid UTF-8")]
    Value(#[from] std::str::Utf8Error),
}

/// A case-insensitive, single-value HTTP header map.
///
/// Preserves the insertion order (and spelling) of the first occurrence of each
/// name, which is also the order used when encoding.
///
/// # Examples
///
/// ```
/// use spindle::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html");
/// headers.insert("content-type", "text/plain");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any existing value stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .inner
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some((_, existing)) => *existing = value,
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes the header with the given name (case-insensitive).
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains an entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns `true` if the comma-separated value of `name` contains `token`
    /// (compared case-insensitively), e.g. `Connection: keep-alive, Upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Returns the number of header entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Decodes one header line (without its CRLF) into a trimmed `(name, value)` pair.
    ///
    /// The name must be a valid token followed directly by `:`.
    ///
    /// ```
    /// use spindle::http::Headers;
    ///
    /// let (name, value) = Headers::decode_field(b"Host:  example.com ").unwrap();
    /// assert_eq!((name.as_str(), value.as_str()), ("Host", "example.com"));
    /// assert!(Headers::decode_field(b"no colon here").is_err());
    /// ```
    pub fn decode_field(line: &[u8]) -> Result<(String, String), HeaderError> {
        let mut framed = Vec::with_capacity(line.len() + 4);
        framed.extend_from_slice(line);
        framed.extend_from_slice(b"\r\n\r\n");

        let mut slots = [httparse::EMPTY_HEADER; 1];
        let field = match httparse::parse_headers(&framed, &mut slots)? {
            httparse::Status::Complete((_, [field])) => field,
            _ => return Err(HeaderError::NotAField),
        };

        let value = std::str::from_utf8(field.value)?;
        Ok((field.name.to_owned(), value.trim().to_owned()))
    }

    /// Encodes the headers as `name: value\r\n` lines, without the final blank line.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
