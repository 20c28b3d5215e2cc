//! Backend request encoding and connection setup.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::request::ProxyRequest;
use crate::proxy::tree::ProxyTarget;
use crate::proxy::ProxyError;

/// Headers the proxy regenerates or drops instead of copying.
const REWRITTEN_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "expect",
    "upgrade",
];

/// Serialize `request` for the backend behind `leaf`.
///
/// `body` replaces the client body on the wire; the client's framing is
/// replaced by a single `Content-Length`.
pub fn encode_request(request: &ProxyRequest, leaf: &ProxyTarget, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(
        format!(
            "{} {} HTTP/1.{}\r\n",
            request.method,
            leaf.request_target(request.query()),
            request.version
        )
        .as_bytes(),
    );

    // Connection-scoped headers named in `Connection` go too.
    let listed: Vec<&[u8]> = request
        .headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("connection"))
        .flat_map(|(_, v)| v.split(|&b| b == b','))
        .map(|t| t.trim_ascii())
        .collect();

    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        if REWRITTEN_HEADERS.contains(&lower.as_str())
            || listed.iter().any(|t| t.eq_ignore_ascii_case(lower.as_bytes()))
        {
            continue;
        }
        push_header(&mut out, name, value);
    }

    push_header(&mut out, "Host", leaf.host_header().as_bytes());
    match request.header("upgrade") {
        Some(protocol) if request.wants_upgrade() => {
            push_header(&mut out, "Connection", b"Upgrade");
            push_header(&mut out, "Upgrade", protocol);
        }
        _ => push_header(&mut out, "Connection", b"close"),
    }
    if request.framed_body || !body.is_empty() {
        push_header(&mut out, "Content-Length", body.len().to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// Open a fresh backend connection and send the encoded request.
pub async fn send_to_backend(
    leaf: &ProxyTarget,
    encoded: &[u8],
    connect_timeout: Duration,
) -> Result<TcpStream, ProxyError> {
    let address = format!("{}:{}", leaf.host, leaf.port);
    let mut stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProxyError::BackendUnreachable(e)),
        Err(_) => return Err(ProxyError::BackendTimeout("connecting")),
    };
    let _ = stream.set_nodelay(true);

    stream
        .write_all(encoded)
        .await
        .map_err(ProxyError::BackendUnreachable)?;

    tracing::debug!(backend = %address, bytes = encoded.len(), "Request forwarded");
    Ok(stream)
}
