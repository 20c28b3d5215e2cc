//! Client connection abstraction and lifecycle tracking.
//!
//! # Responsibilities
//! - Buffer client reads for the HTTP request parser
//! - Expose a half-close operation on every transport
//! - Pipe raw bytes in both directions once a response is downgraded
//! - Generate unique connection IDs and count live connections

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::observability::metrics;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 8 * 1024;

/// Process-wide client connection number, logged as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How the write side of a client transport is closed.
///
/// Chosen when the connection is constructed. `HalfClose` transports keep
/// reading after their write side is shut down; `FullClose` transports end
/// the whole session instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    HalfClose,
    FullClose,
}

/// Byte counts of a finished raw session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    pub to_client: u64,
    pub to_backend: u64,
}

/// The client side of a proxied connection.
#[derive(Debug)]
pub struct ClientConnection<S> {
    id: ConnectionId,
    stream: S,
    read_buf: BytesMut,
    close_mode: CloseMode,
    /// Set once any response byte of the current exchange reached the client.
    responded: bool,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, close_mode: CloseMode) -> Self {
        Self {
            id: ConnectionId::next(),
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            close_mode,
            responded: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Start a new request/response exchange.
    pub fn begin_exchange(&mut self) {
        self.responded = false;
    }

    /// True if part of a response was already written in this exchange.
    pub fn responded(&self) -> bool {
        self.responded
    }

    /// Bytes read from the client but not yet consumed.
    pub fn buffered(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }

    /// Read more bytes into the buffer. Returns 0 at end of stream.
    pub async fn fill_buf(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.read_buf).await
    }

    /// Write bytes to the client.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.responded = true;
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Close the write direction towards the client.
    pub async fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Relay raw bytes between the client and `backend` until the session ends.
    ///
    /// Buffered client bytes are sent to the backend first. Client EOF shuts
    /// down the backend write side. Backend EOF shuts down the client write
    /// side; under `CloseMode::FullClose` it also ends the session. Any I/O
    /// error ends the session.
    pub async fn pipe<B>(&mut self, backend: B) -> io::Result<PipeStats>
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);
        if !self.read_buf.is_empty() {
            backend_wr.write_all(&self.read_buf).await?;
            self.read_buf.clear();
        }

        let close_mode = self.close_mode;
        let (mut client_rd, mut client_wr) = tokio::io::split(&mut self.stream);

        let to_client = async {
            let n = tokio::io::copy(&mut backend_rd, &mut client_wr).await?;
            client_wr.shutdown().await?;
            Ok::<_, io::Error>(n)
        };
        let to_backend = async {
            let n = tokio::io::copy(&mut client_rd, &mut backend_wr).await?;
            backend_wr.shutdown().await?;
            Ok::<_, io::Error>(n)
        };

        match close_mode {
            CloseMode::HalfClose => {
                let (to_client, to_backend) = tokio::try_join!(to_client, to_backend)?;
                Ok(PipeStats {
                    to_client,
                    to_backend,
                })
            }
            CloseMode::FullClose => {
                tokio::pin!(to_client);
                tokio::pin!(to_backend);
                let mut sent = None;
                loop {
                    tokio::select! {
                        n = &mut to_client => {
                            return Ok(PipeStats {
                                to_client: n?,
                                to_backend: sent.unwrap_or(0),
                            });
                        }
                        n = &mut to_backend, if sent.is_none() => {
                            sent = Some(n?);
                        }
                    }
                }
            }
        }
    }
}

/// Count of live client connections.
///
/// Shared by the accept loop, the admin API and shutdown, which waits for
/// the count to reach zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    live: Arc<watch::Sender<u64>>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self { live: Arc::new(live) }
    }

    /// Count one connection until the returned guard drops.
    pub fn track(&self) -> ConnectionGuard {
        adjust(&self.live, |n| n + 1);
        ConnectionGuard {
            live: Arc::clone(&self.live),
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.live.borrow()
    }

    /// Wait until all connections are closed or `grace` elapses.
    ///
    /// Returns true if every connection drained in time.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let mut rx = self.live.subscribe();
        let drained = async move { rx.wait_for(|n| *n == 0).await.is_ok() };
        tokio::time::timeout(grace, drained).await.unwrap_or(false)
    }
}

fn adjust(live: &watch::Sender<u64>, f: impl FnOnce(u64) -> u64) {
    let mut now = 0;
    live.send_modify(|n| {
        *n = f(*n);
        now = *n;
    });
    metrics::set_active_connections(now);
}

#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<watch::Sender<u64>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        adjust(&self.live, |n| n.saturating_sub(1));
    }
}
