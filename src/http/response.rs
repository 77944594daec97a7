//! HTTP/1.1 response.
//!
//! A [`Response`] can be assembled with the fluent builder methods or filled in
//! place by a handler through [`set_status`](Response::set_status),
//! [`set_header`](Response::set_header) and [`send`](Response::send). The
//! connection ends it, stamps the framing headers and serializes it with
//! [`into_bytes`](Response::into_bytes).

use std::time::SystemTime;

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use super::headers::names::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, DATE, KEEP_ALIVE, SERVER};
use super::{Headers, Method, Request, StatusCode};

/// Persistence advertised by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Close,
    KeepAlive {
        /// Idle timeout in seconds, `0` when unlimited.
        timeout_secs: u64,
        /// Requests left on this connection, `None` when unlimited.
        remaining: Option<u32>,
    },
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use spindle::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
    head_only: bool,
    ended: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
            head_only: false,
            ended: false,
        }
    }

    /// Creates the `200 OK` response a handler fills for `request`.
    ///
    /// Responses to `HEAD` never carry a body.
    pub fn for_request(request: &Request) -> Self {
        let mut response = Self::new(StatusCode::Ok);
        response.head_only = request.method() == Method::Head;
        response
    }

    /// Creates an error response whose body is the status line text and
    /// which closes the connection.
    pub fn rejection(status: StatusCode) -> Self {
        Self::new(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(status.to_string())
            .keep_alive(false)
    }

    /// Discards everything set so far, ended or not, and turns this response
    /// into a [`rejection`](Self::rejection) for `status`.
    pub fn fail(&mut self, status: StatusCode) {
        let head_only = self.head_only;
        *self = Self::rejection(status);
        self.head_only = head_only;
    }

    /// Sets a response header, replacing an existing one of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// Returns `false` once the response requires the connection to close.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive && !self.headers.has_token(CONNECTION, "close")
    }

    pub fn is_head_only(&self) -> bool {
        self.head_only
    }

    /// Returns `true` once [`end`](Self::end) was called. An ended response
    /// ignores further changes.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if !self.ended {
            self.status = status;
        }
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if !self.ended {
            self.headers.insert(name, value);
        }
    }

    /// Asks for the connection to close after this response.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        if !self.ended {
            self.keep_alive = keep_alive;
        }
    }

    /// Sets the body and its `Content-Type`, then ends the response.
    ///
    /// For `HEAD` requests the body is dropped but the content type is kept.
    pub fn send(&mut self, data: impl Into<Vec<u8>>, content_type: &str) {
        if self.ended {
            return;
        }
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = data.into();
        self.end();
    }

    pub fn text(&mut self, text: impl Into<String>) {
        self.send(text.into(), "text/plain; charset=utf-8");
    }

    pub fn html(&mut self, html: impl Into<String>) {
        self.send(html.into(), "text/html; charset=utf-8");
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.send(body, "application/json");
        Ok(())
    }

    /// Finalizes the response.
    ///
    /// A `HEAD` response loses its body, and a `200 OK` without a body becomes
    /// `204 No Content`.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        if self.head_only {
            self.body.clear();
        }
        if self.body.is_empty() && self.status == StatusCode::Ok && !self.head_only {
            self.status = StatusCode::NoContent;
        }
        self.ended = true;
    }

    /// Writes the headers the server core owns: `Date`, `Server`, `Connection`
    /// and `Keep-Alive`. Applies to ended responses too.
    pub fn stamp(&mut self, server_name: &str, persistence: Persistence) {
        self.headers
            .insert(DATE, httpdate::fmt_http_date(SystemTime::now()));
        self.headers.insert(SERVER, server_name);

        match persistence {
            Persistence::Close => {
                self.keep_alive = false;
                self.headers.remove(KEEP_ALIVE);
            }
            Persistence::KeepAlive {
                timeout_secs,
                remaining,
            } => {
                self.keep_alive = true;
                let mut directives = Vec::with_capacity(2);
                if timeout_secs > 0 {
                    directives.push(format!("timeout={timeout_secs}"));
                }
                if let Some(max) = remaining {
                    directives.push(format!("max={max}"));
                }
                if directives.is_empty() {
                    self.headers.remove(KEEP_ALIVE);
                } else {
                    self.headers.insert(KEEP_ALIVE, directives.join(", "));
                }
            }
        }
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>`, except for `204` and `304`.
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(mut self) -> BytesMut {
        if self.head_only {
            self.body.clear();
        }
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.insert(CONNECTION, connection);

        let bodiless = matches!(self.status, StatusCode::NoContent | StatusCode::NotModified);
        if bodiless {
            self.headers.remove(CONTENT_LENGTH);
        } else {
            self.headers
                .insert(CONTENT_LENGTH, content_length.to_string());
        }

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        buf.put(self.headers.encode().as_bytes());
        buf.put(&b"\r\n"[..]);

        if !bodiless {
            buf.put(self.body.as_slice());
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
