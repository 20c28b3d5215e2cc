//! Proxy core: path resolution, forwarding, and response relay.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → tree.rs (path segments → Vec<ProxyTarget>, leaf last)
//!     → handler.rs (endpoints → pre-hooks → final body)
//!     → forward.rs (encode request, fresh backend connection)
//!     → downgrade.rs (HTTP relay or raw-stream pipe)
//!     → client
//! ```
//!
//! # Design Decisions
//! - One backend connection per request, always closed afterwards
//! - The body is final before the first byte reaches the backend
//! - Each request works on one immutable `ProxyState` snapshot

pub mod downgrade;
pub mod error;
pub mod forward;
pub mod handler;
pub mod tree;

pub use downgrade::{FramingState, Relayed, ResponseRelay, RAW_STREAM_CONTENT_TYPE, RAW_STREAM_HEAD};
pub use error::ProxyError;
pub use handler::{render, ProxyState};
pub use tree::{resolve, ProxyTarget};
