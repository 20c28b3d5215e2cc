//! Bounded client listener.
//!
//! A connection slot is taken before `accept`, so at the limit new clients
//! queue in the kernel backlog instead of being read. Accepted sockets have
//! Nagle disabled: attach and exec sessions relay small interactive frames.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
    #[error("Connection limiter closed")]
    Closed,
}

/// Client listener with a cap on live connections.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Wrap an already-bound listener.
    pub fn new(inner: TcpListener, max_connections: usize) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, max_connections, "Accepting Docker API clients");
        Ok(Self::new(inner, max_connections))
    }

    /// Wait for a free slot, then accept the next client.
    ///
    /// The slot is returned with the stream and freed when it is dropped.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        if self.slots.available_permits() == 0 {
            tracing::warn!(
                max_connections = self.max_connections,
                "Connection limit reached, new clients wait for a free slot"
            );
        }
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Could not disable Nagle on client socket");
        }
        tracing::trace!(peer = %peer, free_slots = self.slots.available_permits(), "Client accepted");

        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One occupied connection slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}
