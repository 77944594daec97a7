//! Single-task HTTP/1.1 server using Tokio.
//!
//! One loop owns the listener and every connection. Each iteration waits for
//! whichever comes first: a new connection, the next tick, or shutdown. On a
//! tick every open connection is served once without blocking, then
//! connections that finished are drained and dropped. No task is spawned per
//! connection, so handlers run one at a time on the loop itself.

use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, MissedTickBehavior};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::http::StatusCode;
use crate::router::Router;

pub mod connection;
pub mod tls;

pub use connection::{Connection, ConnectionError, ConnectionId, ConnectionState};
pub use tls::{TlsError, Transport};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// The spindle HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::config::ServerConfig;
/// use spindle::router::Router;
/// use spindle::server::Server;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("", |_req, res, _params| {
///         res.text("Hello!");
///         Ok(())
///     })?;
///
///     let server = Server::bind(ServerConfig::new("127.0.0.1", 8080), router).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    router: Router,
    tls: Option<TlsAcceptor>,
    connections: Vec<Connection<Transport>>,
}

impl Server {
    /// Validates `config`, loads TLS settings and binds the listener.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] if the configuration is invalid.
    /// - [`ServerError::Tls`] if certificates or keys cannot be loaded.
    /// - [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig, router: Router) -> Result<Self, ServerError> {
        config.validate()?;
        let tls = config.tls.as_ref().map(tls::load_acceptor).transpose()?;

        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            router,
            tls,
            connections: Vec::new(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Number of connections currently tracked, closing ones included.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(future::pending()).await
    }

    /// Runs until `shutdown` resolves, then closes every connection.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %self.local_addr,
            tls = self.tls.is_some(),
            "spindle listening"
        );

        let mut ticker = time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer).await,
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                _ = ticker.tick() => self.tick(),
            }
        }

        info!(connections = self.connections.len(), "shutting down");
        for connection in &mut self.connections {
            let _ = connection.flush();
            connection.close();
        }
        self.connections.clear();
        Ok(())
    }

    async fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }

        let transport = match &self.tls {
            None => Transport::Plain(stream),
            Some(acceptor) => {
                let handshake = acceptor.accept(stream);
                match time::timeout(self.config.tls_handshake_timeout(), handshake).await {
                    Ok(Ok(stream)) => Transport::Tls(Box::new(stream)),
                    Ok(Err(e)) => {
                        warn!(peer = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        warn!(peer = %peer, "TLS handshake timed out");
                        return;
                    }
                }
            }
        };

        let connection = Connection::new(
            transport,
            peer,
            self.tls.is_some(),
            Arc::clone(&self.config),
        );
        debug!(connection = %connection.id(), peer = %peer, "connection accepted");
        self.connections.push(connection);
    }

    /// Serves every connection once, then drains and drops finished ones.
    fn tick(&mut self) {
        for connection in &mut self.connections {
            if let Err(e) = connection.serve(&self.router) {
                warn!(
                    connection = %connection.id(),
                    peer = %connection.peer(),
                    error = %e,
                    "connection failed"
                );
                connection.reject(&self.router, StatusCode::InternalServerError);
            }
        }

        self.connections.retain_mut(|connection| {
            if connection.is_open() {
                return true;
            }
            match connection.flush() {
                Ok(false) if !connection.linger_expired() => true,
                _ => {
                    connection.close();
                    false
                }
            }
        });
    }
}
