//! # spindle
//!
//! An embeddable HTTP/1.1 server core: an incremental request parser, a path
//! router with nesting and static files, and a single-loop server that keeps
//! persistent connections, with optional TLS.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spindle::config::ServerConfig;
//! use spindle::router::Router;
//! use spindle::server::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("", |_req, res, _params| {
//!         res.text("Hello, World!");
//!         Ok(())
//!     })?;
//!     router.get("users/:id", |req, res, _params| {
//!         res.json(&serde_json::json!({ "id": req.path_param("id") }))?;
//!         Ok(())
//!     })?;
//!
//!     let server = Server::bind(ServerConfig::new("127.0.0.1", 8080), router).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod http;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Route, Router};
pub use server::{Server, ServerError};
