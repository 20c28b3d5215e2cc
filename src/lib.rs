//! Hook proxy for the container daemon API.
//!
//! Sits between container clients and the daemon, runs configured pre-hook
//! plugins over JSON request bodies, and downgrades raw-stream responses to a
//! bidirectional byte pipe.

pub mod admin;
pub mod config;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use http::{AppState, ProxyServer};
pub use lifecycle::Shutdown;
