//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ClientConnection, lifecycle tracking)
//!     → Hand off to HTTP layer
//!
//! After a raw-stream downgrade:
//!     connection.rs pipes bytes both ways, half-closing per CloseMode
//! ```
//!
//! # Design Decisions
//! - A connection slot is held from accept until the client socket closes
//! - Live connections are counted so shutdown can wait for them
//! - Half-close behaviour is fixed when a connection is constructed

pub mod connection;
pub mod listener;

pub use connection::{ClientConnection, CloseMode, ConnectionId, ConnectionTracker, PipeStats};
pub use listener::{Listener, ListenerError};
