//! Backend response relay with raw-stream downgrade.
//!
//! # Responsibilities
//! - Read the backend response head line by line
//! - Switch to raw framing the moment the raw-stream content type appears
//! - Relay ordinary responses verbatim with their own body framing
//!
//! # Data Flow
//! ```text
//! AwaitingHeaders ──Content-Type: raw-stream──► RawFramed ──► pipe ──► close
//!        │
//!        └──blank line──► HttpFramed ──► relay body ──► keep-alive / close
//! ```
//!
//! # Design Decisions
//! - The marker is checked per header line, before the head is complete
//! - Once raw, the rest of the backend head is skipped unparsed
//! - `101 Switching Protocols` without the marker is tunnelled after its head

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::http::response::{
    parse_header_line, parse_status_line, take_line, BodyFraming, ChunkedTracker, FramingError,
    ResponseMeta,
};
use crate::net::ClientConnection;
use crate::observability::metrics;
use crate::proxy::ProxyError;

/// Content type announcing that the response becomes a raw byte stream.
pub const RAW_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.raw-stream";

/// Head written to the client when a response is downgraded.
pub const RAW_STREAM_HEAD: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.raw-stream\r\n\r\n";

const READ_CHUNK: usize = 8 * 1024;

/// Framing of the response currently being relayed. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingState {
    AwaitingHeaders,
    HttpFramed,
    RawFramed,
}

/// How a relayed response finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relayed {
    pub status: u16,
    pub state: FramingState,
    /// The client connection may carry another request.
    pub reusable: bool,
}

/// True if `name: value` is the raw-stream marker header.
pub fn is_raw_marker(name: &str, value: &[u8]) -> bool {
    name.eq_ignore_ascii_case("content-type") && value == RAW_STREAM_CONTENT_TYPE.as_bytes()
}

/// Relays one backend response to the client.
pub struct ResponseRelay<'a, S> {
    client: &'a mut ClientConnection<S>,
    backend: TcpStream,
    method: &'a str,
    max_head_bytes: usize,
    state: FramingState,
    buf: BytesMut,
}

impl<'a, S> ResponseRelay<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        client: &'a mut ClientConnection<S>,
        backend: TcpStream,
        method: &'a str,
        max_head_bytes: usize,
    ) -> Self {
        Self {
            client,
            backend,
            method,
            max_head_bytes,
            state: FramingState::AwaitingHeaders,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    fn transition(&mut self, next: FramingState) {
        debug_assert_eq!(self.state, FramingState::AwaitingHeaders);
        tracing::trace!(from = ?self.state, to = ?next, "Framing transition");
        self.state = next;
    }

    /// Relay the response. `head_timeout` bounds the wait for the response head.
    pub async fn run(mut self, head_timeout: Duration) -> Result<Relayed, ProxyError> {
        let deadline = Instant::now() + head_timeout;
        let mut meta = ResponseMeta::default();
        let mut status_seen = false;
        let mut pos = 0;

        let head_end = 'head: loop {
            while let Some((line, next)) = take_line(&self.buf, pos) {
                pos = next;
                if !status_seen {
                    let status = parse_status_line(line)?;
                    meta.status = status.code;
                    meta.version = status.version;
                    status_seen = true;
                    continue;
                }
                if line.is_empty() {
                    break 'head pos;
                }
                let (name, value) = parse_header_line(line)?;
                if is_raw_marker(name, value) {
                    return self.downgrade(pos, deadline).await;
                }
                meta.observe(name, value)?;
            }

            if self.buf.len() > self.max_head_bytes {
                return Err(FramingError("response head too large".into()).into());
            }
            if self.read_before(deadline).await? == 0 {
                return Err(FramingError("backend closed before completing the response head".into()).into());
            }
        };

        self.transition(FramingState::HttpFramed);
        let head = self.buf.split_to(head_end);
        self.client.write_all(&head).await?;

        if meta.status == 101 {
            self.flush_leftover().await?;
            let stats = self.client.pipe(&mut self.backend).await?;
            tracing::debug!(to_client = stats.to_client, to_backend = stats.to_backend, "Upgrade tunnel closed");
            return Ok(Relayed {
                status: 101,
                state: FramingState::HttpFramed,
                reusable: false,
            });
        }

        let framing = meta.framing(self.method);
        self.relay_body(framing).await?;

        Ok(Relayed {
            status: meta.status,
            state: FramingState::HttpFramed,
            reusable: meta.reusable(self.method),
        })
    }

    async fn read_before(&mut self, deadline: Instant) -> Result<usize, ProxyError> {
        self.buf.reserve(READ_CHUNK);
        match tokio::time::timeout_at(deadline, self.backend.read_buf(&mut self.buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(ProxyError::BackendTimeout("waiting for response headers")),
        }
    }

    /// Switch to raw framing. `pos` is just past the marker header line.
    async fn downgrade(mut self, mut pos: usize, deadline: Instant) -> Result<Relayed, ProxyError> {
        self.transition(FramingState::RawFramed);
        metrics::record_raw_session();
        self.client.write_all(RAW_STREAM_HEAD).await?;

        // Skip the remaining backend header lines.
        let body_start = loop {
            match take_line(&self.buf, pos) {
                Some((line, next)) if line.is_empty() => break Some(next),
                Some((_, next)) => pos = next,
                None => {
                    if self.buf.len() > self.max_head_bytes {
                        return Err(FramingError("response head too large".into()).into());
                    }
                    if self.read_before(deadline).await? == 0 {
                        break None;
                    }
                }
            }
        };

        let Some(body_start) = body_start else {
            tracing::debug!("Backend closed inside a raw-stream head");
            return Ok(self.raw_done());
        };

        self.buf.advance(body_start);
        self.flush_leftover().await?;
        let stats = self.client.pipe(&mut self.backend).await?;
        tracing::debug!(
            to_client = stats.to_client,
            to_backend = stats.to_backend,
            "Raw stream closed"
        );
        Ok(self.raw_done())
    }

    fn raw_done(&self) -> Relayed {
        Relayed {
            status: 200,
            state: FramingState::RawFramed,
            reusable: false,
        }
    }

    /// Forward backend bytes already read past the head.
    async fn flush_leftover(&mut self) -> Result<(), ProxyError> {
        if !self.buf.is_empty() {
            let leftover = self.buf.split();
            self.client.write_all(&leftover).await?;
        }
        Ok(())
    }

    async fn relay_body(&mut self, framing: BodyFraming) -> Result<(), ProxyError> {
        let mut remaining = match framing {
            BodyFraming::Empty => return Ok(()),
            BodyFraming::Length(n) => n,
            BodyFraming::Chunked | BodyFraming::UntilClose => 0,
        };
        let mut tracker = ChunkedTracker::new();
        let mut pending = self.buf.split();

        loop {
            if !pending.is_empty() {
                let (end, done) = match framing {
                    BodyFraming::Length(_) => {
                        let take = remaining.min(pending.len() as u64);
                        remaining -= take;
                        (take as usize, remaining == 0)
                    }
                    BodyFraming::Chunked => match tracker.feed(&pending)? {
                        Some(end) => (end, true),
                        None => (pending.len(), false),
                    },
                    _ => (pending.len(), false),
                };
                self.client.write_all(&pending[..end]).await?;
                if done {
                    if end < pending.len() {
                        tracing::debug!(extra = pending.len() - end, "Discarding bytes after response body");
                    }
                    return Ok(());
                }
                pending.clear();
            }

            pending.reserve(READ_CHUNK);
            if self.backend.read_buf(&mut pending).await? == 0 {
                return match framing {
                    BodyFraming::UntilClose => Ok(()),
                    _ => Err(FramingError("backend closed before the end of the body".into()).into()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::CloseMode;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[test]
    fn marker_matches_exact_value_only() {
        assert!(is_raw_marker("content-type", b"application/vnd.docker.raw-stream"));
        assert!(is_raw_marker("Content-Type", b"application/vnd.docker.raw-stream"));
        assert!(!is_raw_marker("Content-Type", b"application/vnd.docker.raw-stream; x=1"));
        assert!(!is_raw_marker("X-Content-Type", b"application/vnd.docker.raw-stream"));
    }

    #[tokio::test]
    async fn downgrades_on_marker_and_skips_remaining_head() {
        let (mut client, proxy_side) = tcp_pair().await;
        let (proxy_backend, mut backend) = tcp_pair().await;

        backend
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.raw-stream\r\n\
                  Transfer-Encoding: chunked\r\nX-Ignored: yes\r\n\r\nstream-bytes",
            )
            .await
            .unwrap();
        backend.shutdown().await.unwrap();

        let relay = tokio::spawn(async move {
            let mut conn = ClientConnection::new(proxy_side, CloseMode::HalfClose);
            ResponseRelay::new(&mut conn, proxy_backend, "POST", 64 * 1024)
                .run(Duration::from_secs(5))
                .await
        });

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let mut expected = RAW_STREAM_HEAD.to_vec();
        expected.extend_from_slice(b"stream-bytes");
        assert_eq!(received, expected);

        client.write_all(b"stdin").await.unwrap();
        client.shutdown().await.unwrap();
        let mut forwarded = Vec::new();
        backend.read_to_end(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, b"stdin");

        let relayed = relay.await.unwrap().unwrap();
        assert_eq!(relayed.state, FramingState::RawFramed);
        assert!(!relayed.reusable);
    }

    #[tokio::test]
    async fn relays_chunked_response_verbatim() {
        let (mut client, proxy_side) = tcp_pair().await;
        let (proxy_backend, mut backend) = tcp_pair().await;

        let response: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n\
              2\r\n{}\r\n0\r\n\r\n";
        backend.write_all(response).await.unwrap();

        let mut conn = ClientConnection::new(proxy_side, CloseMode::HalfClose);
        let relayed = ResponseRelay::new(&mut conn, proxy_backend, "GET", 64 * 1024)
            .run(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(relayed.status, 200);
        assert_eq!(relayed.state, FramingState::HttpFramed);
        assert!(relayed.reusable);
        drop(conn);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn content_length_body_and_close() {
        let (mut client, proxy_side) = tcp_pair().await;
        let (proxy_backend, mut backend) = tcp_pair().await;

        backend
            .write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 4\r\n\r\nnope")
            .await
            .unwrap();

        let mut conn = ClientConnection::new(proxy_side, CloseMode::HalfClose);
        let relayed = ResponseRelay::new(&mut conn, proxy_backend, "GET", 64 * 1024)
            .run(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(relayed.status, 404);
        assert!(!relayed.reusable);
        drop(conn);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.ends_with(b"\r\n\r\nnope"));
    }

    #[tokio::test]
    async fn head_timeout_is_reported_before_any_bytes() {
        let (_client, proxy_side) = tcp_pair().await;
        let (proxy_backend, _backend) = tcp_pair().await;

        let mut conn = ClientConnection::new(proxy_side, CloseMode::HalfClose);
        let err = ResponseRelay::new(&mut conn, proxy_backend, "GET", 64 * 1024)
            .run(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BackendTimeout(_)));
        assert!(!conn.responded());
    }

    #[tokio::test]
    async fn truncated_head_is_a_protocol_error() {
        let (_client, proxy_side) = tcp_pair().await;
        let (proxy_backend, mut backend) = tcp_pair().await;
        backend.write_all(b"HTTP/1.1 200 OK\r\nContent-").await.unwrap();
        backend.shutdown().await.unwrap();

        let mut conn = ClientConnection::new(proxy_side, CloseMode::HalfClose);
        let err = ResponseRelay::new(&mut conn, proxy_backend, "GET", 64 * 1024)
            .run(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BackendProtocol(_)));
    }
}
