//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, per-connection request loop)
//!     → request.rs (parse head, read body within limits)
//!     → [proxy core renders the request]
//!     → response.rs (backend head lines, body framing, error responses)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::ProxyRequest;
pub use server::{AppState, ProxyServer};
