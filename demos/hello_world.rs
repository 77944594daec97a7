//! Minimal spindle server.
//!
//! ```text
//! cargo run --example hello_world              # http://127.0.0.1:8080
//! cargo run --example hello_world config.json  # settings from a JSON file
//! ```
//!
//! Set `RUST_LOG=spindle=debug` to see per-connection logs.

use serde::Deserialize;
use spindle::config::ServerConfig;
use spindle::router::Router;
use spindle::server::Server;
use spindle::StatusCode;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::new("127.0.0.1", 8080),
    };

    let mut users = Router::new();
    users.get(":id", |req, res, _| {
        res.json(&serde_json::json!({ "id": req.path_param("id") }))?;
        Ok(())
    })?;
    users.post("", |req, res, _| {
        let user: NewUser = req.json()?;
        res.set_status(StatusCode::Created);
        res.json(&serde_json::json!({ "name": user.name }))?;
        Ok(())
    })?;

    let mut router = Router::new();
    router.get("", |_, res, _| {
        res.html("<h1>Hello from spindle</h1>");
        Ok(())
    })?;
    router.get("search", |req, res, _| {
        res.text(format!("you searched for {:?}", req.query_param("q").unwrap_or("")));
        Ok(())
    })?;
    router.get_file("robots.txt", "robots.txt", Some("User-agent: *\nDisallow:\n".into()))?;
    router.route("users", users)?;

    let server = Server::bind(config, router).await?;
    println!("Listening on http://{}", server.local_addr());

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
