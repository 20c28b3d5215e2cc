//! Plugin hook subsystem.
//!
//! # Data Flow
//! ```text
//! Leaf request (method, JSON body)
//!     → registry yields ordered pre-hook names → URIs
//!     → chain.rs POSTs payload.rs bodies to each hook in turn
//!     → each successful response's "Body" becomes the current body
//!     → final body handed back to the proxy handler
//! ```
//!
//! # Design Decisions
//! - Strictly sequential: hook N+1 starts after hook N resolves
//! - A failing hook is a no-op; the chain never fails the request
//! - Every call is bounded by the configured hook timeout

pub mod chain;
pub mod payload;

use thiserror::Error;

pub use chain::{ChainOutcome, HookChain, HookTarget};

/// Failure of a single hook call.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook did not answer within the configured timeout.
    #[error("hook call timed out")]
    Timeout,

    /// Connection or transfer failure.
    #[error("hook unreachable: {0}")]
    Transport(reqwest::Error),

    /// The hook answered with a non-2xx status.
    #[error("hook returned status {0}")]
    Status(u16),

    /// The response was not a JSON object with a "Body" member.
    #[error("hook protocol error: {0}")]
    Protocol(String),
}

impl HookError {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            HookError::Timeout => "timeout",
            HookError::Transport(_) => "transport",
            HookError::Status(_) => "status",
            HookError::Protocol(_) => "protocol",
        }
    }
}

impl From<reqwest::Error> for HookError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HookError::Timeout
        } else {
            HookError::Transport(e)
        }
    }
}
