//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, per-request spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Hook names, paths and outcomes are span fields, not message text
//! - Every request span carries a UUID v4 `request_id`
//! - Without `metrics_enabled` no recorder is installed

pub mod logging;
pub mod metrics;
