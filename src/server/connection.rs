//! Connection state machine and request/response lifecycle.
//!
//! # Responsibilities
//! - Buffer inbound bytes and feed them to one [`RequestParser`] at a time
//! - Dispatch complete requests to the [`Router`] and queue the responses
//! - Apply the keep-alive policy (idle timeout, request cap, `Connection: close`)
//! - Drain queued output before the socket is shut down
//!
//! A connection never blocks the loop that owns it: every socket operation is
//! polled exactly once with [`now_or_never`](FutureExt::now_or_never), and
//! whatever is not ready is retried on the next tick.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::http::parser::ParserMisuse;
use crate::http::response::Persistence;
use crate::http::{ParserState, Request, RequestParser, Response, StatusCode};
use crate::router::Router;

/// How long a closing connection may keep trying to drain its output.
pub const CLOSE_LINGER: Duration = Duration::from_secs(5);

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reading and serving requests.
    Open,
    /// No more requests are read; queued output is still drained.
    Closing,
    /// The socket was shut down.
    Closed,
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("parser misuse: {0}")]
    Parser(#[from] ParserMisuse),
}

/// One client connection over any byte stream.
///
/// The server uses it over TCP or TLS; tests drive it over
/// [`tokio::io::duplex`].
pub struct Connection<S> {
    id: ConnectionId,
    peer: SocketAddr,
    stream: S,
    secure: bool,
    config: Arc<ServerConfig>,
    state: ConnectionState,
    inbound: BytesMut,
    outbound: BytesMut,
    parser: Option<RequestParser>,
    served: u32,
    last_activity: Instant,
    closing_since: Option<Instant>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an accepted stream. `secure` marks TLS streams, whose requests
    /// resolve to `https` targets.
    pub fn new(stream: S, peer: SocketAddr, secure: bool, config: Arc<ServerConfig>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            stream,
            secure,
            config,
            state: ConnectionState::Open,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            parser: None,
            served: 0,
            last_activity: Instant::now(),
            closing_since: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closing(&self) -> bool {
        self.state == ConnectionState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Number of requests dispatched on this connection.
    pub fn served(&self) -> u32 {
        self.served
    }

    /// Bytes queued for the client but not yet written.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    /// Returns `true` when the idle timeout is enabled and has elapsed.
    pub fn idle_expired(&self) -> bool {
        self.config
            .keep_alive
            .timeout()
            .is_some_and(|timeout| self.last_activity.elapsed() >= timeout)
    }

    /// Returns `true` once a closing connection has tried to drain for too long.
    pub fn linger_expired(&self) -> bool {
        self.closing_since
            .is_some_and(|since| since.elapsed() >= CLOSE_LINGER)
    }

    /// Runs one tick: reads what is available, advances the parser and
    /// dispatches at most one complete request.
    pub fn serve(&mut self, router: &Router) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Ok(());
        }
        if self.idle_expired() {
            debug!(connection = %self.id, peer = %self.peer, "idle timeout");
            self.mark_closing();
            return Ok(());
        }

        self.read(self.config.limits.read_chunk_size)?;
        if !self.is_open() || self.inbound.is_empty() {
            return Ok(());
        }

        let limits = self.config.limits;
        let secure = self.secure;
        let parser = self
            .parser
            .get_or_insert_with(|| RequestParser::new(limits, secure));
        let data = self.inbound.split();
        let leftover = parser.append(&data)?;

        match parser.state() {
            ParserState::Invalid(status) => {
                self.parser = None;
                warn!(
                    connection = %self.id,
                    peer = %self.peer,
                    status = status.as_u16(),
                    "rejecting invalid request"
                );
                self.reject(router, status);
            }
            ParserState::Complete => {
                if let Some(rest) = leftover {
                    self.inbound = rest;
                }
                if let Some(parser) = self.parser.take() {
                    let request = parser.into_request()?;
                    self.dispatch(request, router);
                }
            }
            _ => {}
        }

        self.flush()?;
        Ok(())
    }

    /// Reads at most `max_bytes` without waiting, never growing the inbound
    /// buffer past the configured ceiling. Returns whether data was appended.
    ///
    /// End of stream marks the connection closing; no response is attempted.
    pub fn read(&mut self, max_bytes: usize) -> Result<bool, ConnectionError> {
        if !self.is_open() {
            return Ok(false);
        }
        let room = self
            .config
            .limits
            .max_buffer_size
            .saturating_sub(self.inbound.len())
            .min(max_bytes);
        if room == 0 {
            return Ok(false);
        }

        self.inbound.reserve(room);
        let mut window = (&mut self.inbound).limit(room);
        match self.stream.read_buf(&mut window).now_or_never() {
            None => Ok(false),
            Some(Ok(0)) => {
                debug!(connection = %self.id, peer = %self.peer, "peer closed the connection");
                self.mark_closing();
                Ok(false)
            }
            Some(Ok(_)) => {
                self.last_activity = Instant::now();
                Ok(true)
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Writes as much queued output as the socket takes without waiting.
    ///
    /// Returns `true` once everything queued has been written and flushed.
    pub fn flush(&mut self) -> Result<bool, ConnectionError> {
        if self.is_closed() {
            return Ok(true);
        }

        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound).now_or_never() {
                None => return Ok(false),
                Some(Ok(0)) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Some(Ok(written)) => self.outbound.advance(written),
                Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Some(Err(e)) => return Err(e.into()),
            }
        }

        match self.stream.flush().now_or_never() {
            None => Ok(false),
            Some(Ok(())) => Ok(true),
            Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Queues the router's rejection for `status` and stops reading requests.
    pub fn reject(&mut self, router: &Router, status: StatusCode) {
        if self.is_closed() {
            return;
        }
        self.send(router.reject_request(status), false);
        self.mark_closing();
    }

    /// Shuts the socket down. Output still queued is dropped.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let _ = self.stream.shutdown().now_or_never();
        self.state = ConnectionState::Closed;
        self.parser = None;
        self.inbound.clear();
        self.outbound.clear();
        debug!(
            connection = %self.id,
            peer = %self.peer,
            served = self.served,
            "connection closed"
        );
    }

    fn mark_closing(&mut self) {
        if self.is_open() {
            self.state = ConnectionState::Closing;
            self.closing_since = Some(Instant::now());
        }
    }

    fn dispatch(&mut self, mut request: Request, router: &Router) {
        self.served += 1;
        self.last_activity = Instant::now();

        let max_requests = self.config.keep_alive.max_requests;
        let mut keep_alive = request.is_keep_alive();
        if max_requests > 0 && self.served >= max_requests {
            keep_alive = false;
        }

        debug!(
            connection = %self.id,
            method = %request.method(),
            path = request.path(),
            "dispatching request"
        );

        let mut response = Response::for_request(&request);
        router.handle_request(&mut request, &mut response);
        keep_alive &= response.is_keep_alive();

        self.send(response, keep_alive);
        if !keep_alive {
            self.mark_closing();
        }
    }

    fn send(&mut self, mut response: Response, keep_alive: bool) {
        response.end();

        let persistence = if keep_alive {
            let max_requests = self.config.keep_alive.max_requests;
            Persistence::KeepAlive {
                timeout_secs: self.config.keep_alive.timeout_secs,
                remaining: (max_requests > 0).then(|| max_requests.saturating_sub(self.served)),
            }
        } else {
            Persistence::Close
        };
        response.stamp(&self.config.server_name, persistence);

        debug!(
            connection = %self.id,
            status = response.status().as_u16(),
            keep_alive,
            "response queued"
        );
        self.outbound.put(response.into_bytes());
        self.last_activity = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use tokio::io::{duplex, DuplexStream};

    fn config(timeout_secs: u64, max_requests: u32) -> Arc<ServerConfig> {
        Arc::new(ServerConfig::default().with_keep_alive(timeout_secs, max_requests))
    }

    fn connection(config: Arc<ServerConfig>) -> (DuplexStream, Connection<DuplexStream>) {
        let (client, server) = duplex(64 * 1024);
        let peer = "127.0.0.1:40000".parse().unwrap();
        (client, Connection::new(server, peer, false, config))
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .get("", |_, res, _| {
                res.text("hello");
                Ok(())
            })
            .unwrap();
        router
            .post("echo", |req, res, _| {
                res.send(req.body().to_vec(), "application/octet-stream");
                Ok(())
            })
            .unwrap();
        router
            .get("bye", |_, res, _| {
                res.set_keep_alive(false);
                res.text("bye");
                Ok(())
            })
            .unwrap();
        router
    }

    fn drain(client: &mut DuplexStream) -> String {
        let mut buf = BytesMut::new();
        while let Some(Ok(read)) = client.read_buf(&mut buf).now_or_never() {
            if read == 0 {
                break;
            }
        }
        String::from_utf8(buf.to_vec()).unwrap()
    }

    const GET: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    #[tokio::test]
    async fn serves_a_request() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client.write_all(GET).await.unwrap();
        conn.serve(&router).unwrap();

        let response = drain(&mut client);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("Connection: keep-alive\r\n"));
        assert!(response.contains("Keep-Alive: timeout=5, max=99\r\n"));
        assert!(response.contains("Server: spindle/"));
        assert!(response.contains("Date: "));
        assert!(response.ends_with("\r\n\r\nhello"));
        assert!(conn.is_open());
        assert_eq!(conn.served(), 1);
    }

    #[tokio::test]
    async fn request_split_across_ticks() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"POST /echo HTTP/1.1\r\nHost: h\r\nContent-Le")
            .await
            .unwrap();
        conn.serve(&router).unwrap();
        assert!(drain(&mut client).is_empty());

        client.write_all(b"ngth: 5\r\n\r\nab").await.unwrap();
        conn.serve(&router).unwrap();
        assert!(drain(&mut client).is_empty());

        client.write_all(b"cde").await.unwrap();
        conn.serve(&router).unwrap();
        assert!(drain(&mut client).ends_with("\r\n\r\nabcde"));
    }

    #[tokio::test]
    async fn closes_after_max_requests() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 3));

        for round in 1..=3 {
            client.write_all(GET).await.unwrap();
            conn.serve(&router).unwrap();
            let response = drain(&mut client);
            if round < 3 {
                assert!(response.contains("Connection: keep-alive\r\n"));
                assert!(response.contains(&format!("max={}", 3 - round)));
                assert!(conn.is_open());
            } else {
                assert!(response.contains("Connection: close\r\n"));
                assert!(!response.contains("Keep-Alive"));
                assert!(conn.is_closing());
            }
        }

        // a closing connection reads nothing more
        client.write_all(GET).await.unwrap();
        conn.serve(&router).unwrap();
        assert!(drain(&mut client).is_empty());
        assert_eq!(conn.served(), 3);
    }

    #[tokio::test]
    async fn unlimited_requests_stay_open() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 0));

        for _ in 0..5 {
            client.write_all(GET).await.unwrap();
            conn.serve(&router).unwrap();
            let response = drain(&mut client);
            assert!(response.contains("Connection: keep-alive\r\n"), "{response}");
            assert!(response.contains("Keep-Alive: timeout=5\r\n"));
            assert!(!response.contains("max="));
            assert!(conn.is_open());
        }
        assert_eq!(conn.served(), 5);
    }

    #[tokio::test]
    async fn reads_smaller_than_a_line() {
        let router = router();
        let limits = Limits {
            max_buffer_size: 16,
            read_chunk_size: 16,
            ..Limits::default()
        };
        let config = Arc::new(ServerConfig::default().with_limits(limits));
        let (mut client, mut conn) = connection(config);

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n")
            .await
            .unwrap();
        for _ in 0..20 {
            conn.serve(&router).unwrap();
        }

        let response = drain(&mut client);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("\r\n\r\nhello"));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn client_requests_close() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        conn.serve(&router).unwrap();

        assert!(drain(&mut client).contains("Connection: close\r\n"));
        assert!(conn.is_closing());
        assert!(conn.flush().unwrap());
        conn.close();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn handler_asks_to_close() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"GET /bye HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap();
        conn.serve(&router).unwrap();

        let response = drain(&mut client);
        assert!(response.contains("Connection: close\r\n"), "{response}");
        assert!(response.ends_with("\r\n\r\nbye"));
        assert!(conn.is_closing());
    }

    #[tokio::test]
    async fn http10_closes_by_default() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"GET / HTTP/1.0\r\nHost: h\r\n\r\n")
            .await
            .unwrap();
        conn.serve(&router).unwrap();

        assert!(drain(&mut client).contains("Connection: close\r\n"));
        assert!(conn.is_closing());
    }

    #[tokio::test]
    async fn pipelined_requests_one_per_tick() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        let mut both = GET.to_vec();
        both.extend_from_slice(b"POST /echo HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nok");
        client.write_all(&both).await.unwrap();

        conn.serve(&router).unwrap();
        assert!(drain(&mut client).ends_with("hello"));

        conn.serve(&router).unwrap();
        assert!(drain(&mut client).ends_with("\r\n\r\nok"));
        assert_eq!(conn.served(), 2);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"BREW /pot HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap();
        conn.serve(&router).unwrap();

        let response = drain(&mut client);
        assert!(response.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("501 Not Implemented"));
        assert!(conn.is_closing());
        assert_eq!(conn.served(), 0);
    }

    #[tokio::test]
    async fn head_request_has_no_body() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        client
            .write_all(b"HEAD / HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap();
        conn.serve(&router).unwrap();

        // no HEAD route registered
        let response = drain(&mut client);
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn read_reports_appended_data() {
        let (mut client, mut conn) = connection(config(5, 100));

        assert!(!conn.read(1024).unwrap());
        client.write_all(b"GET").await.unwrap();
        assert!(conn.read(1024).unwrap());
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn end_of_stream_closes_without_response() {
        let router = router();
        let (client, mut conn) = connection(config(5, 100));

        drop(client);
        conn.serve(&router).unwrap();
        assert!(conn.is_closing());
        assert_eq!(conn.pending_output(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        conn.serve(&router).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        conn.serve(&router).unwrap();
        assert!(conn.is_open());

        tokio::time::advance(Duration::from_secs(2)).await;
        conn.serve(&router).unwrap();
        assert!(conn.is_closing());
        assert!(drain(&mut client).is_empty());

        assert!(!conn.linger_expired());
        tokio::time::advance(CLOSE_LINGER).await;
        assert!(conn.linger_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_expires() {
        let router = router();
        let (_client, mut conn) = connection(config(0, 0));

        tokio::time::advance(Duration::from_secs(3600)).await;
        conn.serve(&router).unwrap();
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn reject_queues_error_response() {
        let router = router();
        let (mut client, mut conn) = connection(config(5, 100));

        conn.reject(&router, StatusCode::InternalServerError);
        assert!(conn.is_closing());
        assert!(conn.flush().unwrap());
        assert!(drain(&mut client).starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }
}
