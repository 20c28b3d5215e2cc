//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, uri)
//!     → registry.rs (endpoint lookup)
//!     → matcher.rs (evaluate "METHOD /pattern" keys)
//!     → Return: matched endpoint ids → ordered pre/post hooks → hook URIs
//!
//! Registry Compilation (at startup and on reload):
//!     ProxyConfig.endpoints + ProxyConfig.plugins
//!     → Compile patterns
//!     → Freeze as immutable PluginRegistry
//! ```
//!
//! # Design Decisions
//! - Registry compiled from config, immutable at runtime
//! - No regex in hot path (wildcard scan only)
//! - Deterministic: same input always yields the same hook order

pub mod matcher;
pub mod registry;

pub use matcher::{EndpointKeyError, EndpointPattern};
pub use registry::{EndpointHooks, PluginRegistry};
