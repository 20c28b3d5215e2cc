//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{http::header::CONTENT_TYPE, http::StatusCode, routing::post, Json, Router};
use hook_proxy::config::{EndpointConfig, ProxyConfig};
use hook_proxy::net::Listener;
use hook_proxy::{AppState, ProxyServer, Shutdown};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Read one HTTP request (head plus Content-Length body) from `socket`.
pub async fn read_http_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = find_head_end(&buf) {
            let body_len = content_length(&buf[..head_end]);
            if buf.len() >= head_end + body_len {
                buf.truncate(head_end + body_len);
                return buf;
            }
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return buf;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Body of a recorded request.
pub fn body_of(request: &[u8]) -> &[u8] {
    match find_head_end(request) {
        Some(end) => &request[end..],
        None => &[],
    }
}

/// Start a raw TCP backend; `handler` gets each request and the socket.
pub async fn start_backend<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Vec<u8>, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let request = read_http_request(&mut socket).await;
                handler(request, socket).await;
            });
        }
    });
    addr
}

/// Start a backend that answers every request with `response` and records
/// the request bytes it received.
pub async fn start_recording_backend(
    response: &'static [u8],
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = start_backend(move |request, mut socket| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(request);
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    })
    .await;
    (addr, rx)
}

/// An address nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Observations shared by a group of mock hooks.
#[derive(Debug, Default)]
pub struct HookProbe {
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// `(hook name, payload)` in call order.
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl HookProbe {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Start a mock hook plugin; returns its URI.
///
/// `respond` maps the received payload to a status and raw response body.
pub async fn start_hook<F>(name: &str, probe: Arc<HookProbe>, respond: F) -> String
where
    F: Fn(&Value) -> (u16, String) + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    let name = name.to_string();

    let handler = move |Json(payload): Json<Value>| {
        let probe = probe.clone();
        let respond = respond.clone();
        let name = name.clone();
        async move {
            let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            let (status, body) = respond(&payload);
            probe.calls.lock().unwrap().push((name, payload));
            probe.in_flight.fetch_sub(1, Ordering::SeqCst);

            (
                StatusCode::from_u16(status).unwrap(),
                [(CONTENT_TYPE, "application/json")],
                body,
            )
        }
    };

    let app = Router::new().route("/hook", post(handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/hook", addr)
}

/// Hook response that replaces the body with `body`.
pub fn replace_with(body: Value) -> (u16, String) {
    (200, serde_json::json!({ "Body": body }).to_string())
}

/// A running proxy on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Configuration pointing at `backend` with short timeouts.
pub fn test_config(backend: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.backend.address = backend.to_string();
    config.timeouts.hook_secs = 2;
    config.timeouts.backend_connect_secs = 2;
    config.timeouts.backend_response_secs = 5;
    config
}

/// Attach `pre` hooks to `endpoint`, registering each `(name, uri)` plugin.
pub fn add_endpoint(config: &mut ProxyConfig, endpoint: &str, pre: &[(&str, &str)]) {
    config.endpoints.insert(
        endpoint.to_string(),
        EndpointConfig {
            pre: pre.iter().map(|(name, _)| name.to_string()).collect(),
            post: Vec::new(),
        },
    );
    for (name, uri) in pre {
        config.plugins.insert(name.to_string(), uri.to_string());
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::new(tcp, config.listener.max_connections);

    let state = AppState::new(config).unwrap();
    let shutdown = Shutdown::new();
    let (updates, update_rx) = mpsc::unbounded_channel();

    let server = ProxyServer::new(state.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, update_rx, server_shutdown).await;
    });

    TestProxy {
        addr,
        state,
        shutdown,
        updates,
    }
}

/// HTTP client that never routes through a system proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}
