//! Proxy server: accept loop and per-connection request loop.
//!
//! # Responsibilities
//! - Accept client connections within the connection limit
//! - Read requests one after another on each connection
//! - Hand each request to the proxy core with a configuration snapshot
//! - Swap in reloaded configurations
//! - Stop accepting on shutdown and drain live connections
//!
//! # Design Decisions
//! - Configuration lives in an `ArcSwap`; a request loads it once
//! - Errors are answered only while no response byte has been written
//! - Raw sessions and upgrades always end the connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ConfigError, ProxyConfig};
use crate::http::request::read_request;
use crate::http::response::error_response;
use crate::net::{ClientConnection, CloseMode, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::proxy::{render, ProxyError, ProxyState};

/// How long shutdown waits for open connections.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// State shared between the proxy and the admin API.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<ProxyState>>,
    pub tracker: ConnectionTracker,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(ProxyState::new(config)?)),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Replace the live configuration. Requests in flight keep their snapshot.
    pub fn apply(&self, config: ProxyConfig) -> Result<(), ConfigError> {
        let previous_bind = self.inner.load().config.listener.bind_address.clone();
        if previous_bind != config.listener.bind_address {
            tracing::warn!(
                current = %previous_bind,
                requested = %config.listener.bind_address,
                "Listener address changes require a restart"
            );
        }

        let state = ProxyState::new(config)?;
        tracing::info!(
            endpoints = state.registry.endpoints().count(),
            backend = %state.config.backend.address,
            "Configuration reloaded"
        );
        self.inner.store(Arc::new(state));
        Ok(())
    }
}

/// The hook proxy server.
pub struct ProxyServer {
    state: AppState,
}

impl ProxyServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "Proxy server listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                Some(config) = config_updates.recv() => {
                    if let Err(e) = self.state.apply(config) {
                        tracing::error!(error = %e, "Rejected reloaded configuration");
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => return Err(ListenerError::Closed),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let close_mode = if self.state.inner.load().config.listener.half_close {
                        CloseMode::HalfClose
                    } else {
                        CloseMode::FullClose
                    };

                    let shared = Arc::clone(&self.state.inner);
                    let guard = self.state.tracker.track();
                    tokio::spawn(async move {
                        let conn = ClientConnection::new(stream, close_mode);
                        serve_connection(conn, peer, shared).await;
                        drop(permit);
                        drop(guard);
                    });
                }
            }
        }

        if self.state.tracker.wait_for_drain(DRAIN_GRACE).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.state.tracker.active_count(),
                "Drain grace period elapsed with connections still open"
            );
        }
        Ok(())
    }
}

/// Serve requests on one client connection until it closes.
pub async fn serve_connection<S>(
    mut conn: ClientConnection<S>,
    peer: SocketAddr,
    shared: Arc<ArcSwap<ProxyState>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!(connection = %conn.id(), peer = %peer, "Connection opened");

    loop {
        conn.begin_exchange();
        let limits = shared.load().config.limits.clone();

        let request = match read_request(&mut conn, &limits).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(connection = %conn.id(), error = %e, "Rejected client request");
                respond_error(&mut conn, &e).await;
                break;
            }
        };

        let snapshot = shared.load_full();
        let start = Instant::now();
        let span = tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            connection = %conn.id(),
            method = %request.method,
            path = %request.path(),
        );

        let result = render(&snapshot, &request, &mut conn)
            .instrument(span.clone())
            .await;

        match result {
            Ok(relayed) => {
                metrics::record_request(&request.method, relayed.status, start);
                span.in_scope(|| {
                    tracing::info!(
                        status = relayed.status,
                        framing = ?relayed.state,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Request completed"
                    );
                });
                if !relayed.reusable || request.wants_close() || request.wants_upgrade() {
                    break;
                }
            }
            Err(e) => {
                metrics::record_request(&request.method, e.status().as_u16(), start);
                span.in_scope(|| {
                    tracing::warn!(error = %e, responded = conn.responded(), "Request failed");
                });
                respond_error(&mut conn, &e).await;
                break;
            }
        }
    }

    let _ = conn.shutdown_write().await;
    tracing::debug!(connection = %conn.id(), "Connection closed");
}

/// Send an error response unless part of a response already went out.
async fn respond_error<S>(conn: &mut ClientConnection<S>, error: &ProxyError)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.responded() {
        return;
    }
    let response = error_response(error.status(), &error.to_string());
    if let Err(e) = conn.write_all(&response).await {
        tracing::debug!(error = %e, "Failed to deliver error response");
    }
}
