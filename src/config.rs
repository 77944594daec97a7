//! Server configuration.
//!
//! Every type derives Serde traits with `#[serde(default)]`, so a JSON document
//! only needs to name the fields it overrides:
//!
//! ```
//! use spindle::config::ServerConfig;
//!
//! let config = ServerConfig::from_json_str(r#"{ "port": 8080, "keep_alive": { "max_requests": 3 } }"#).unwrap();
//! assert_eq!(config.address(), "0.0.0.0:8080");
//! assert_eq!(config.keep_alive.max_requests, 3);
//! assert_eq!(config.keep_alive.timeout_secs, 5);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration for a [`Server`](crate::server::Server).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host (e.g. `"0.0.0.0"`).
    pub host: String,

    /// Bind port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Value of the `Server` response header.
    pub server_name: String,

    /// Optional TLS settings; plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Persistent connection policy.
    pub keep_alive: KeepAliveConfig,

    /// Parser and buffering limits.
    pub limits: Limits,

    /// Interval between two passes over all open connections.
    pub tick_interval_ms: u64,

    /// Upper bound on the accept-time TLS handshake.
    pub tls_handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            server_name: concat!("spindle/", env!("CARGO_PKG_VERSION")).to_string(),
            tls: None,
            keep_alive: KeepAliveConfig::default(),
            limits: Limits::default(),
            tick_interval_ms: 1,
            tls_handshake_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration for `host:port` with every other field at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, timeout_secs: u64, max_requests: u32) -> Self {
        self.keep_alive = KeepAliveConfig {
            timeout_secs,
            max_requests,
        };
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the `host:port` bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `true` when TLS is configured.
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    /// Checks the invariants the server relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("tls.cert_path must not be empty".into()));
            }
        }
        self.limits.validate()
    }
}

/// Persistent connection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Idle seconds before an open connection is closed. `0` disables the timeout.
    pub timeout_secs: u64,

    /// Requests served on one connection before it is closed. `0` means unlimited.
    pub max_requests: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_requests: 100,
        }
    }
}

impl KeepAliveConfig {
    /// Returns the idle timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Size limits enforced while reading requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// Longest accepted request line, in bytes (414 beyond).
    pub max_request_line_length: usize,

    /// Longest accepted single header line, in bytes (431 beyond).
    pub max_header_line_length: usize,

    /// Largest accepted header section, CRLFs included (431 beyond).
    pub max_headers_length: usize,

    /// Largest accepted `Content-Length` (413 beyond).
    pub max_body_size: usize,

    /// Ceiling on received-but-unparsed bytes held per connection.
    pub max_buffer_size: usize,

    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_request_line_length: 8000,
            max_header_line_length: 8192,
            max_headers_length: 16 * 1024,
            max_body_size: 8 * 1024 * 1024,
            max_buffer_size: 64 * 1024,
            read_chunk_size: 8192,
        }
    }
}

impl Limits {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_request_line_length", self.max_request_line_length),
            ("max_header_line_length", self.max_header_line_length),
            ("max_headers_length", self.max_headers_length),
            ("max_buffer_size", self.max_buffer_size),
            ("read_chunk_size", self.read_chunk_size),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("limits.{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// TLS listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,

    /// PEM private key. When absent the key is read from `cert_path`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Cipher suites in preference order, by rustls name
    /// (e.g. `TLS13_AES_128_GCM_SHA256`). Empty keeps the provider defaults.
    #[serde(default)]
    pub cipher_suites: Vec<String>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: Some(key_path.into()),
            cipher_suites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cipher_suites<I, S>(mut self, suites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cipher_suites = suites.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the file the private key is read from.
    pub fn key_file(&self) -> &Path {
        self.key_path.as_deref().unwrap_or(&self.cert_path)
    }
}
