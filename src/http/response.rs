//! Backend response framing.
//!
//! # Responsibilities
//! - Split the backend response head into lines as bytes arrive
//! - Parse status and header lines one at a time
//! - Decide how the response body is delimited
//! - Track the end of a chunked body without decoding it
//! - Render proxy-generated error responses
//!
//! # Design Decisions
//! - Bodies are relayed verbatim; framing is only observed, never rewritten
//! - Interim 1xx responses are not expected: the backend never sees `Expect`

use axum::http::StatusCode;
use thiserror::Error;

use httparse::Status;

use crate::http::request::has_token;

const MAX_CHUNK_LINE: usize = 4 * 1024;

/// Malformed framing in a backend response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FramingError(pub String);

/// Parsed backend status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    pub version: u8,
    pub code: u16,
}

/// Find the next line in `buf` starting at `from`.
///
/// Returns the line without its terminator and the offset just past it.
pub fn take_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(from..)?;
    let pos = rest.iter().position(|&b| b == b'\n')?;
    let line = &rest[..pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, from + pos + 1))
}

/// Parse `HTTP/1.x NNN reason`.
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine, FramingError> {
    let invalid = || FramingError(format!("invalid status line {:?}", String::from_utf8_lossy(line)));

    let rest = line.strip_prefix(b"HTTP/1.").ok_or_else(invalid)?;
    let version = match rest.first() {
        Some(b'0') => 0,
        Some(b'1') => 1,
        _ => return Err(invalid()),
    };
    let rest = rest.get(1..).ok_or_else(invalid)?;
    let rest = rest.strip_prefix(b" ").ok_or_else(invalid)?;
    let code = rest
        .get(..3)
        .and_then(|c| std::str::from_utf8(c).ok())
        .and_then(|c| c.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(invalid)?;
    if rest.len() > 3 && rest[3] != b' ' {
        return Err(invalid());
    }
    Ok(StatusLine { version, code })
}

/// Parse `Name: value`, trimming optional whitespace around the value.
pub fn parse_header_line(line: &[u8]) -> Result<(&str, &[u8]), FramingError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| FramingError(format!("invalid header line {:?}", String::from_utf8_lossy(line))))?;
    let name = std::str::from_utf8(&line[..colon])
        .ok()
        .filter(|n| !n.is_empty() && n.bytes().all(is_token_byte))
        .ok_or_else(|| FramingError("invalid header name".into()))?;
    Ok((name, line[colon + 1..].trim_ascii()))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head.
    Empty,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Chunked transfer coding.
    Chunked,
    /// The body runs until the backend closes the connection.
    UntilClose,
}

/// Framing-relevant facts gathered while reading a response head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub version: u8,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub close: bool,
}

impl ResponseMeta {
    /// Record one header.
    pub fn observe(&mut self, name: &str, value: &[u8]) -> Result<(), FramingError> {
        if name.eq_ignore_ascii_case("content-length") {
            let len = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| FramingError("invalid Content-Length".into()))?;
            if self.content_length.is_some_and(|prev| prev != len) {
                return Err(FramingError("conflicting Content-Length headers".into()));
            }
            self.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.chunked |= has_token(value, "chunked");
        } else if name.eq_ignore_ascii_case("connection") {
            self.close |= has_token(value, "close");
        }
        Ok(())
    }

    /// Body framing per RFC 9112 section 6.3.
    pub fn framing(&self, request_method: &str) -> BodyFraming {
        if request_method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            BodyFraming::Empty
        } else if self.chunked {
            BodyFraming::Chunked
        } else if let Some(len) = self.content_length {
            if len == 0 {
                BodyFraming::Empty
            } else {
                BodyFraming::Length(len)
            }
        } else {
            BodyFraming::UntilClose
        }
    }

    /// True if the client connection can carry another request afterwards.
    pub fn reusable(&self, request_method: &str) -> bool {
        !self.close
            && self.version == 1
            && self.framing(request_method) != BodyFraming::UntilClose
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChunkState {
    Size(Vec<u8>),
    Data(u64),
    DataEnd,
    Trailer { line_empty: bool },
    Done,
}

/// Observes a chunked body as it streams past and reports where it ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedTracker {
    state: ChunkState,
}

impl Default for ChunkedTracker {
    fn default() -> Self {
        Self {
            state: ChunkState::Size(Vec::new()),
        }
    }
}

impl ChunkedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next slice of body bytes.
    ///
    /// Returns `Some(n)` when the body ends after the first `n` bytes of `data`.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<usize>, FramingError> {
        let mut i = 0;
        while i < data.len() {
            match &mut self.state {
                ChunkState::Size(line) => {
                    if line.len() >= MAX_CHUNK_LINE {
                        return Err(FramingError("chunk size line too long".into()));
                    }
                    let b = data[i];
                    i += 1;
                    line.push(b);
                    if b == b'\n' {
                        let size = match httparse::parse_chunk_size(line) {
                            Ok(Status::Complete((_, size))) => size,
                            _ => return Err(FramingError("invalid chunk size".into())),
                        };
                        self.state = if size == 0 {
                            ChunkState::Trailer { line_empty: true }
                        } else {
                            ChunkState::Data(size)
                        };
                    }
                }
                ChunkState::Data(remaining) => {
                    let take = (*remaining).min((data.len() - i) as u64);
                    i += take as usize;
                    *remaining -= take;
                    if *remaining == 0 {
                        self.state = ChunkState::DataEnd;
                    }
                }
                ChunkState::DataEnd => {
                    let b = data[i];
                    i += 1;
                    match b {
                        b'\r' => {}
                        b'\n' => self.state = ChunkState::Size(Vec::new()),
                        _ => return Err(FramingError("missing CRLF after chunk data".into())),
                    }
                }
                ChunkState::Trailer { line_empty } => {
                    let b = data[i];
                    i += 1;
                    match b {
                        b'\n' if *line_empty => {
                            self.state = ChunkState::Done;
                            return Ok(Some(i));
                        }
                        b'\n' => *line_empty = true,
                        b'\r' => {}
                        _ => *line_empty = false,
                    }
                }
                ChunkState::Done => return Ok(Some(i)),
            }
        }
        Ok(match self.state {
            ChunkState::Done => Some(i),
            _ => None,
        })
    }
}

/// A minimal response for errors produced by the proxy itself.
pub fn error_response(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}
