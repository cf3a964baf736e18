//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All components produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON in production)
//!     → Metrics endpoint (Prometheus scrape)
//!     → /admin/stats/* (component stats records, see admin module)
//! ```
//!
//! # Design Decisions
//! - Request ID (x-request-id) is attached to error reports and events
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
