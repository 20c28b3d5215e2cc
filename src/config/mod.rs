//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → compiled into a PluginRegistry, shared via Arc
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its ArcSwap<ProxyState>
//!     → requests already in flight keep their snapshot
//! ```
//!
//! # Design Decisions
//! - A reload replaces the endpoint table and plugin set as a whole
//! - Only `backend.address` is required; everything else has a default
//! - Endpoint patterns and plugin references are checked after deserializing
//! - The listener address is read once at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{BackendConfig, EndpointConfig, ListenerConfig, ProxyConfig};
