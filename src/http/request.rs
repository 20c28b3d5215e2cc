//! Client request parsing.
//!
//! # Responsibilities
//! - Parse the request head from buffered client bytes
//! - Read the body (Content-Length or chunked) within size limits
//! - Answer the framing questions the proxy asks (JSON? close? upgrade?)
//!
//! # Design Decisions
//! - Header names keep their original case and order
//! - A request carrying both Content-Length and Transfer-Encoding is rejected
//! - Chunked bodies are decoded; the backend always receives Content-Length

use bytes::{Buf, Bytes, BytesMut};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::schema::LimitsConfig;
use crate::net::ClientConnection;
use crate::proxy::ProxyError;

const MAX_HEADERS: usize = 100;
const MAX_CHUNK_LINE: usize = 4 * 1024;

/// A fully read client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    /// Request target exactly as sent (path and query).
    pub target: String,
    /// HTTP minor version (0 or 1).
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    /// True if the client framed a body (even an empty one).
    pub framed_body: bool,
}

impl ProxyRequest {
    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(&self.target, |(path, _)| path)
    }

    /// Query component of the target, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// First value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// True if any `Connection` header lists `token`.
    pub fn connection_has(&self, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("connection"))
            .any(|(_, v)| has_token(v, token))
    }

    /// True if the client wants the connection closed after this exchange.
    pub fn wants_close(&self) -> bool {
        if self.version == 0 {
            !self.connection_has("keep-alive")
        } else {
            self.connection_has("close")
        }
    }

    /// True if the client asked for a protocol upgrade.
    pub fn wants_upgrade(&self) -> bool {
        self.connection_has("upgrade") && self.header("upgrade").is_some()
    }

    /// True if the body is present.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// True if the declared media type is `application/json`.
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(|v| {
                let media_type = v.split(';').next().unwrap_or("").trim();
                media_type.eq_ignore_ascii_case("application/json")
            })
            .unwrap_or(false)
    }
}

/// Returns true if a comma-separated header value contains `token`.
pub fn has_token(value: &[u8], token: &str) -> bool {
    value
        .split(|&b| b == b',')
        .any(|part| part.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    version: u8,
    headers: Vec<(String, Vec<u8>)>,
}

fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, ProxyError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(Status::Complete(len)) => {
            let head = RequestHead {
                method: req.method.unwrap_or_default().to_string(),
                target: req.path.unwrap_or_default().to_string(),
                version: req.version.unwrap_or(1),
                headers: req
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), h.value.to_vec()))
                    .collect(),
            };
            Ok(Some((head, len)))
        }
        Ok(Status::Partial) => Ok(None),
        Err(httparse::Error::TooManyHeaders) => Err(ProxyError::BadRequest("too many headers".into())),
        Err(e) => Err(ProxyError::BadRequest(e.to_string())),
    }
}

/// Read the next request from the client.
///
/// Returns `Ok(None)` when the client closed the connection between requests.
pub async fn read_request<S>(
    conn: &mut ClientConnection<S>,
    limits: &LimitsConfig,
) -> Result<Option<ProxyRequest>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = loop {
        if let Some((head, len)) = parse_head(conn.buffered())? {
            if len > limits.max_header_bytes {
                return Err(ProxyError::HeadersTooLarge(limits.max_header_bytes));
            }
            conn.buffered().advance(len);
            break head;
        }
        if conn.buffered().len() > limits.max_header_bytes {
            return Err(ProxyError::HeadersTooLarge(limits.max_header_bytes));
        }
        if conn.fill_buf().await? == 0 {
            if conn.buffered().is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::BadRequest("connection closed mid-request".into()));
        }
    };

    let mut request = ProxyRequest {
        method: head.method,
        target: head.target,
        version: head.version,
        headers: head.headers,
        body: Bytes::new(),
        framed_body: false,
    };

    let chunked = request
        .headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("transfer-encoding"))
        .any(|(_, v)| has_token(v, "chunked"));
    let content_length = content_length(&request)?;

    request.body = match (chunked, content_length) {
        (true, Some(_)) => {
            return Err(ProxyError::BadRequest(
                "both Content-Length and Transfer-Encoding present".into(),
            ))
        }
        (true, None) => {
            request.framed_body = true;
            read_chunked(conn, limits.max_body_bytes).await?
        }
        (false, Some(len)) => {
            request.framed_body = true;
            if len > limits.max_body_bytes {
                return Err(ProxyError::PayloadTooLarge(limits.max_body_bytes));
            }
            read_exact(conn, len).await?
        }
        (false, None) => Bytes::new(),
    };

    Ok(Some(request))
}

fn content_length(request: &ProxyRequest) -> Result<Option<usize>, ProxyError> {
    let mut found: Option<usize> = None;
    for (_, value) in request
        .headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("content-length"))
    {
        let parsed = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| ProxyError::BadRequest("invalid Content-Length".into()))?;
        if found.is_some_and(|prev| prev != parsed) {
            return Err(ProxyError::BadRequest("conflicting Content-Length headers".into()));
        }
        found = Some(parsed);
    }
    Ok(found)
}

async fn read_exact<S>(conn: &mut ClientConnection<S>, len: usize) -> Result<Bytes, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while conn.buffered().len() < len {
        if conn.fill_buf().await? == 0 {
            return Err(ProxyError::BadRequest("connection closed mid-body".into()));
        }
    }
    Ok(conn.buffered().split_to(len).freeze())
}

/// Take one CRLF-terminated line from the buffer, reading more as needed.
async fn read_line<S>(conn: &mut ClientConnection<S>) -> Result<BytesMut, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if let Some(pos) = conn.buffered().iter().position(|&b| b == b'\n') {
            let mut line = conn.buffered().split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            return Ok(line);
        }
        if conn.buffered().len() > MAX_CHUNK_LINE {
            return Err(ProxyError::BadRequest("chunk line too long".into()));
        }
        if conn.fill_buf().await? == 0 {
            return Err(ProxyError::BadRequest("connection closed mid-body".into()));
        }
    }
}

async fn read_chunked<S>(conn: &mut ClientConnection<S>, max: usize) -> Result<Bytes, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let size = read_chunk_size(conn).await?;
        let size = usize::try_from(size).map_err(|_| ProxyError::PayloadTooLarge(max))?;
        if size == 0 {
            break;
        }
        if body.len().saturating_add(size) > max {
            return Err(ProxyError::PayloadTooLarge(max));
        }
        body.extend_from_slice(&read_exact(conn, size).await?);
        if !read_line(conn).await?.is_empty() {
            return Err(ProxyError::BadRequest("missing CRLF after chunk".into()));
        }
    }
    // Trailers are discarded.
    while !read_line(conn).await?.is_empty() {}
    Ok(body.freeze())
}

/// Consume one chunk-size line, extensions included.
async fn read_chunk_size<S>(conn: &mut ClientConnection<S>) -> Result<u64, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match httparse::parse_chunk_size(conn.buffered()) {
            Ok(Status::Complete((used, size))) => {
                conn.buffered().advance(used);
                return Ok(size);
            }
            Ok(Status::Partial) => {}
            Err(_) => return Err(ProxyError::BadRequest("invalid chunk size".into())),
        }
        if conn.buffered().len() > MAX_CHUNK_LINE {
            return Err(ProxyError::BadRequest("chunk line too long".into()));
        }
        if conn.fill_buf().await? == 0 {
            return Err(ProxyError::BadRequest("connection closed mid-body".into()));
        }
    }
}
