//! End-to-end tests over real TCP sockets.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use spindle::config::ServerConfig;
use spindle::router::Router;
use spindle::server::{Server, ServerError};
use spindle::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    async fn start(config: ServerConfig, router: Router) -> Self {
        let server = Server::bind(config, router).await.unwrap();
        let addr = server.local_addr();
        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = signal.await;
        }));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn connect(&self) -> Client {
        Client {
            stream: TcpStream::connect(self.addr).await.unwrap(),
            buf: Vec::new(),
        }
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn send(&mut self, raw: &str) {
        self.stream.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn get(&mut self, path: &str) -> String {
        self.send(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
            .await;
        self.response().await
    }

    /// Reads exactly one response, framed by `Content-Length`.
    async fn response(&mut self) -> String {
        loop {
            if let Some(end) = find(&self.buf, b"\r\n\r\n") {
                let head = std::str::from_utf8(&self.buf[..end]).unwrap();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("Content-Length: "))
                    .map_or(0, |value| value.parse::<usize>().unwrap());
                let total = end + 4 + length;
                if self.buf.len() >= total {
                    let rest = self.buf.split_off(total);
                    let response = std::mem::replace(&mut self.buf, rest);
                    return String::from_utf8(response).unwrap();
                }
            }
            let mut chunk = [0_u8; 4096];
            let read = timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("response timed out")
                .unwrap();
            assert!(read > 0, "connection closed before a full response");
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Returns `true` when the server closes the connection.
    async fn is_closed(&mut self) -> bool {
        let mut chunk = [0_u8; 64];
        matches!(
            timeout(READ_TIMEOUT, self.stream.read(&mut chunk)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

fn config() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

fn app() -> Router {
    let mut users = Router::new();
    users
        .get(":id", |req, res, _| {
            res.json(&serde_json::json!({
                "id": req.path_param("id"),
                "fields": req.query_param("fields"),
            }))?;
            Ok(())
        })
        .unwrap();

    let mut router = Router::new();
    router
        .get("", |_, res, _| {
            res.html("<h1>home</h1>");
            Ok(())
        })
        .unwrap();
    router
        .post("echo", |req, res, _| {
            res.send(req.body().to_vec(), "text/plain");
            Ok(())
        })
        .unwrap();
    router
        .get("fail", |_, _, _| Err("database unavailable".into()))
        .unwrap();
    router
        .delete("items/:id", |_, res, _| {
            res.set_status(StatusCode::Ok);
            res.end();
            Ok(())
        })
        .unwrap();
    router.route("api/users", users).unwrap();
    router
}

#[tokio::test]
async fn keep_alive_serves_many_requests() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    for _ in 0..3 {
        let response = client.get("/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("Connection: keep-alive\r\n"));
        assert!(response.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert_eq!(body(&response), "<h1>home</h1>");
    }

    server.stop().await;
}

#[tokio::test]
async fn nested_route_with_params() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    let response = client.get("/api/users/42?fields=name").await;
    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json["id"], "42");
    assert_eq!(json["fields"], "name");

    let response = client.get("/api/users").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.contains("Connection: keep-alive\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn post_body_is_echoed() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    client
        .send("POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nhello ")
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.send("world").await;

    let response = client.response().await;
    assert_eq!(body(&response), "hello world");

    server.stop().await;
}

#[tokio::test]
async fn empty_ok_becomes_no_content() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    client
        .send("DELETE /items/9 HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    let response = client.response().await;
    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(!response.contains("Content-Length"));

    server.stop().await;
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    client
        .send(
            "GET /api/users/1 HTTP/1.1\r\nHost: localhost\r\n\r\n\
             GET /api/users/2 HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
    let first = client.response().await;
    let second = client.response().await;
    assert!(body(&first).contains(r#""id":"1""#));
    assert!(body(&second).contains(r#""id":"2""#));

    server.stop().await;
}

#[tokio::test]
async fn max_requests_closes_connection() {
    let server = Running::start(config().with_keep_alive(5, 2), app()).await;
    let mut client = server.connect().await;

    assert!(client.get("/").await.contains("Keep-Alive: timeout=5, max=1\r\n"));
    assert!(client.get("/").await.contains("Connection: close\r\n"));
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let server = Running::start(config().with_keep_alive(1, 100), app()).await;
    let mut client = server.connect().await;

    client.get("/").await;
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let server = Running::start(config(), app()).await;

    let cases = [
        ("GET / HTTP/2.0\r\nHost: localhost\r\n\r\n", "505 HTTP Version Not Supported"),
        ("GET /\r\nHost: localhost\r\n\r\n", "400 Bad Request"),
        ("GET / HTTP/1.1\r\n\r\n", "400 Bad Request"),
        (
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: abc\r\n\r\n",
            "400 Bad Request",
        ),
    ];
    for (raw, status) in cases {
        let mut client = server.connect().await;
        client.send(raw).await;
        let response = client.response().await;
        assert!(response.starts_with(&format!("HTTP/1.1 {status}\r\n")), "{response}");
        assert!(response.contains("Connection: close\r\n"));
        assert_eq!(body(&response), status);
        assert!(client.is_closed().await);
    }

    server.stop().await;
}

#[tokio::test]
async fn failing_handler_returns_500_and_closes() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;

    let response = client.get("/fail").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(client.is_closed().await);

    server.stop().await;
}

#[tokio::test]
async fn static_folder() {
    let folder: PathBuf =
        std::env::temp_dir().join(format!("spindle-static-{}", std::process::id()));
    std::fs::create_dir_all(folder.join("css")).unwrap();
    std::fs::write(folder.join("css/site.css"), "body { margin: 0 }").unwrap();

    let mut router = app();
    router.get_static("assets", &folder).unwrap();
    let server = Running::start(config(), router).await;
    let mut client = server.connect().await;

    let response = client.get("/assets/css/site.css").await;
    assert!(response.contains("Content-Type: text/css\r\n"));
    assert_eq!(body(&response), "body { margin: 0 }");

    let response = client.get("/assets/css/missing.css").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body(&response), "404 File not found.");

    let response = client.get("/assets/..%2F..%2Fetc%2Fpasswd").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body(&response), "404 File not found.");

    server.stop().await;
    std::fs::remove_dir_all(&folder).ok();
}

#[tokio::test]
async fn shutdown_drops_open_connections() {
    let server = Running::start(config(), app()).await;
    let mut client = server.connect().await;
    client.get("/").await;

    server.stop().await;
    assert!(client.is_closed().await);
}
