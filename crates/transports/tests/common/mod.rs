//! Shared helpers for transport integration tests.
//!
//! Every test talks to a throwaway HTTP/1.1 stub bound to an ephemeral port on
//! localhost. Routes:
//!
//! | Path | Response |
//! |------|----------|
//! | `/slow` | `200 slow` after [`SLOW_DELAY`] |
//! | `/fail` | `503 down` |
//! | anything else | `200 hello from <path>` |

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coordinator::{CoordinatorConfig, RequestCoordinator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use transports::{HttpResponse, HttpTransport};

/// How long the `/slow` route waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_secs(10);
/// Upper bound on any await in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding that a proxy stays pending.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(200);

/// A running stub server; stops accepting when dropped.
pub struct StubServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind the stub on an ephemeral port and start serving.
pub async fn spawn_stub() -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
    let addr = listener.local_addr().expect("stub server address");
    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });
    StubServer { addr, task }
}

async fn serve(mut stream: TcpStream) {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&head);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/").to_owned();
    let (status, body) = match path.as_str() {
        "/slow" => {
            tokio::time::sleep(SLOW_DELAY).await;
            ("200 OK", "slow".to_owned())
        }
        "/fail" => ("503 Service Unavailable", "down".to_owned()),
        other => ("200 OK", format!("hello from {other}")),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// A transport that ignores proxy environment variables.
pub fn transport() -> HttpTransport {
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build reqwest client");
    HttpTransport::new(client)
}

/// A coordinator whose default transport is [`transport`].
pub fn http_coordinator(verbose: bool) -> RequestCoordinator<HttpResponse> {
    RequestCoordinator::<HttpResponse>::with_transport(
        CoordinatorConfig { verbose },
        Arc::new(transport()),
    )
}

/// Await `future`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("operation finished within the test timeout")
}

/// `true` if `future` is still pending after [`SETTLE_WINDOW`].
pub async fn stays_pending<F: std::future::Future>(future: F) -> bool {
    tokio::time::timeout(SETTLE_WINDOW, future).await.is_err()
}
