//! Errors raised while proxying a single request.

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

use crate::http::response::FramingError;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client request is malformed or violates the JSON body contract.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(io::Error),

    #[error("backend timed out while {0}")]
    BackendTimeout(&'static str),

    #[error("invalid backend response: {0}")]
    BackendProtocol(#[from] FramingError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Status reported to the client, if a response can still be sent.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::HeadersTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ProxyError::BackendUnreachable(_) | ProxyError::BackendProtocol(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Io(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_status() {
        assert_eq!(ProxyError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::BackendTimeout("connecting").status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ProxyError::BackendProtocol(FramingError("bad".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::BackendTimeout("connecting").to_string(),
            "backend timed out while connecting"
        );
    }
}
