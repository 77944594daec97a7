//! Incremental HTTP/1.1 request parser.
//!
//! [`RequestParser`] accepts a request in arbitrarily split fragments and walks
//! a small state machine:
//!
//! ```text
//! Empty -> ReadingRequestLine -> ReadingHeaders -> ReadingBody -> Complete
//!                  \                   \                \
//!                   +-------------------+----------------+--> Invalid(status)
//! ```
//!
//! Splitting the same bytes at different points always yields the same outcome.
//! Bytes that follow a complete request are handed back to the caller, which
//! is how pipelined requests reach the next parser.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::debug;

use super::headers::names::{CONTENT_LENGTH, HOST};
use super::uri::{HTTP_SCHEME, HTTPS_SCHEME};
use super::{Headers, Method, Request, RequestTarget, StatusCode, Version};
use crate::config::Limits;

const CRLF: &[u8] = b"\r\n";

/// Parser progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Empty,
    ReadingRequestLine,
    ReadingHeaders,
    ReadingBody,
    Complete,
    /// The request was rejected; the status is what the client should receive.
    Invalid(StatusCode),
}

impl ParserState {
    /// Returns `true` for [`Complete`](Self::Complete) and [`Invalid`](Self::Invalid).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Invalid(_))
    }
}

/// Calls that a parser in its current state cannot honour.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserMisuse {
    #[error("cannot append to a request that is already complete")]
    AlreadyComplete,

    #[error("cannot append to a request that was rejected with {0}")]
    AlreadyInvalid(StatusCode),

    #[error("request is not complete")]
    Incomplete,
}

/// Incremental parser for a single request.
///
/// # Examples
///
/// ```
/// use spindle::config::Limits;
/// use spindle::http::{ParserState, RequestParser};
///
/// let mut parser = RequestParser::new(Limits::default(), false);
/// assert_eq!(parser.append(b"GET /hello HTTP/1.1\r\nHo").unwrap(), None);
/// let leftover = parser.append(b"st: localhost\r\n\r\nGET /next").unwrap();
///
/// assert_eq!(parser.state(), ParserState::Complete);
/// assert_eq!(leftover.as_deref(), Some(&b"GET /next"[..]));
///
/// let request = parser.into_request().unwrap();
/// assert_eq!(request.path(), "hello");
/// ```
#[derive(Debug)]
pub struct RequestParser {
    limits: Limits,
    scheme: &'static str,
    state: ParserState,
    buffer: BytesMut,

    request_line: Vec<u8>,
    header_line: Vec<u8>,
    headers_length: usize,

    method: Option<Method>,
    raw_target: String,
    version: Version,
    headers: Headers,
    target: Option<RequestTarget>,
    content_length: usize,
    body: BytesMut,
}

impl RequestParser {
    /// Creates a parser. `secure` selects the `https` scheme for resolved targets.
    pub fn new(limits: Limits, secure: bool) -> Self {
        Self {
            limits,
            scheme: if secure { HTTPS_SCHEME } else { HTTP_SCHEME },
            state: ParserState::Empty,
            buffer: BytesMut::new(),
            request_line: Vec::new(),
            header_line: Vec::new(),
            headers_length: 0,
            method: None,
            raw_target: String::new(),
            version: Version::default(),
            headers: Headers::new(),
            target: None,
            content_length: 0,
            body: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Complete
    }

    /// Returns the rejection status once the parser is [`ParserState::Invalid`].
    pub fn error_status(&self) -> Option<StatusCode> {
        match self.state {
            ParserState::Invalid(status) => Some(status),
            _ => None,
        }
    }

    /// Feeds the next fragment of the request.
    ///
    /// Returns `Ok(Some(leftover))` once the request is complete, where `leftover`
    /// holds the bytes that followed it (possibly none). Returns `Ok(None)` while
    /// more input is needed and after the request turns invalid; inspect
    /// [`state`](Self::state) to tell the two apart.
    ///
    /// Only bytes left unparsed after a call count against `max_buffer_size`,
    /// so the size of a single fragment never decides the outcome.
    ///
    /// # Errors
    ///
    /// Appending to a parser that is already complete or invalid is a caller bug
    /// and yields [`ParserMisuse`].
    pub fn append(&mut self, data: &[u8]) -> Result<Option<BytesMut>, ParserMisuse> {
        match self.state {
            ParserState::Complete => return Err(ParserMisuse::AlreadyComplete),
            ParserState::Invalid(status) => return Err(ParserMisuse::AlreadyInvalid(status)),
            _ => {}
        }

        self.buffer.extend_from_slice(data);

        loop {
            let previous = self.state;
            match self.state {
                ParserState::Empty => self.state = ParserState::ReadingRequestLine,
                ParserState::ReadingRequestLine => {
                    if self.parse_request_line() {
                        self.state = ParserState::ReadingHeaders;
                    }
                }
                ParserState::ReadingHeaders => {
                    if self.parse_headers() {
                        self.state = if self.content_length == 0 {
                            ParserState::Complete
                        } else {
                            ParserState::ReadingBody
                        };
                    }
                }
                ParserState::ReadingBody => {
                    if self.parse_body() {
                        self.state = ParserState::Complete;
                    }
                }
                ParserState::Complete | ParserState::Invalid(_) => break,
            }
            if self.state == previous {
                break;
            }
        }

        // only bytes still waiting to be parsed count against the ceiling
        if !self.state.is_terminal() && self.buffer.len() > self.limits.max_buffer_size {
            self.reject(StatusCode::BadRequest, "unparsed input exceeds the buffer ceiling");
        }

        if self.is_complete() {
            Ok(Some(self.buffer.split()))
        } else {
            Ok(None)
        }
    }

    /// Consumes a complete parser and returns the request.
    pub fn into_request(self) -> Result<Request, ParserMisuse> {
        let (ParserState::Complete, Some(method), Some(target)) =
            (self.state, self.method, self.target)
        else {
            return Err(ParserMisuse::Incomplete);
        };
        Ok(Request::new(
            method,
            target,
            self.version,
            self.headers,
            self.body.freeze(),
        ))
    }

    fn reject(&mut self, status: StatusCode, reason: &str) {
        debug!(status = status.as_u16(), reason, "invalid request");
        self.state = ParserState::Invalid(status);
    }

    fn parse_request_line(&mut self) -> bool {
        let finished = read_until(&mut self.buffer, &mut self.request_line, CRLF);

        if self.request_line.len() > self.limits.max_request_line_length {
            self.reject(StatusCode::UriTooLong, "request line too long");
            return false;
        }
        if !finished {
            return false;
        }

        match split_request_line(&self.request_line) {
            Ok((method, target, version)) => {
                self.method = Some(method);
                self.raw_target = target;
                self.version = version;
                true
            }
            Err((status, reason)) => {
                self.reject(status, reason);
                false
            }
        }
    }

    fn parse_headers(&mut self) -> bool {
        loop {
            let finished = read_until(&mut self.buffer, &mut self.header_line, CRLF);
            let length = self.header_line.len();

            if length > self.limits.max_header_line_length {
                self.reject(StatusCode::RequestHeaderFieldsTooLarge, "header line too long");
                return false;
            }
            if !finished {
                return false;
            }
            if length == 0 {
                break;
            }

            self.headers_length += length + CRLF.len();
            if self.headers_length > self.limits.max_headers_length {
                self.reject(StatusCode::RequestHeaderFieldsTooLarge, "header section too long");
                return false;
            }

            match Headers::decode_field(&self.header_line) {
                Ok((name, value)) => self.headers.insert(name, value),
                Err(e) => {
                    debug!(error = %e, "malformed header line");
                    self.reject(StatusCode::BadRequest, "malformed header line");
                    return false;
                }
            }
            self.header_line.clear();
        }

        let Some(host) = self.headers.get(HOST) else {
            self.reject(StatusCode::BadRequest, "missing Host header");
            return false;
        };
        match RequestTarget::resolve(self.scheme, host, &self.raw_target) {
            Ok(target) => self.target = Some(target),
            Err(e) => {
                debug!(error = %e, "unresolvable request target");
                self.reject(StatusCode::BadRequest, "invalid request target");
                return false;
            }
        }

        let Some(value) = self.headers.get(CONTENT_LENGTH) else {
            self.content_length = 0;
            return true;
        };
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            self.reject(StatusCode::BadRequest, "non-numeric Content-Length");
            return false;
        }
        // digits only, so a parse failure means overflow
        match value.parse::<usize>() {
            Ok(length) if length <= self.limits.max_body_size => {
                self.content_length = length;
                true
            }
            _ => {
                self.reject(StatusCode::PayloadTooLarge, "body exceeds the size limit");
                false
            }
        }
    }

    fn parse_body(&mut self) -> bool {
        let missing = self.content_length.saturating_sub(self.body.len());
        let take = missing.min(self.buffer.len());
        self.body.extend_from_slice(&self.buffer[..take]);
        self.buffer.advance(take);

        match self.body.len().cmp(&self.content_length) {
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Greater => {
                self.reject(StatusCode::InternalServerError, "body overran Content-Length");
                false
            }
        }
    }
}

/// Moves bytes from `buffer` into `line` up to `delimiter`, consuming the
/// delimiter. Returns `true` once the delimiter was found.
///
/// Without a delimiter in sight, the last `delimiter.len() - 1` bytes stay in
/// `buffer` since they may be its first half.
fn read_until(buffer: &mut BytesMut, line: &mut Vec<u8>, delimiter: &[u8]) -> bool {
    if let Some(position) = buffer
        .windows(delimiter.len())
        .position(|window| window == delimiter)
    {
        line.extend_from_slice(&buffer[..position]);
        buffer.advance(position + delimiter.len());
        return true;
    }

    let keep = delimiter.len() - 1;
    if buffer.len() > keep {
        let take = buffer.len() - keep;
        line.extend_from_slice(&buffer[..take]);
        buffer.advance(take);
    }
    false
}

fn split_request_line(
    line: &[u8],
) -> Result<(Method, String, Version), (StatusCode, &'static str)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| (StatusCode::BadRequest, "request line is not UTF-8"))?;

    let parts: Vec<&str> = line.split(' ').collect();
    let [method, target, version] = parts.as_slice() else {
        return Err((StatusCode::BadRequest, "request line needs three tokens"));
    };

    let method: Method = method
        .parse()
        .map_err(|_| (StatusCode::NotImplemented, "unsupported method"))?;
    let version: Version = version
        .parse()
        .map_err(|_| (StatusCode::HttpVersionNotSupported, "unparsable version"))?;
    if version.major != 1 {
        return Err((StatusCode::HttpVersionNotSupported, "unsupported major version"));
    }
    if target.is_empty() {
        return Err((StatusCode::BadRequest, "empty request target"));
    }

    Ok((method, (*target).to_owned(), version))
}
