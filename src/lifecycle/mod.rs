//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     latched flag → HTTP/TLS listeners drain → maintenance timer exits
//!
//! Maintenance (maintenance.rs):
//!     every interval → SecurityPipeline::prune
//! ```
//!
//! # Design Decisions
//! - One latched coordinator; every long-lived task waits on it
//! - Timers never hold locks across ticks

pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use maintenance::spawn_maintenance;
pub use shutdown::Shutdown;
