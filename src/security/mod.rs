//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (client key from peer / proxy headers / user)
//!     → transport.rs (HTTPS redirect, HSTS, secure cookies)
//!     → headers.rs (host check, CSP, hardening headers, redirect check)
//!     → admission.rs (blocked set, rate_limit.rs, ddos.rs, adaptive.rs)
//!     → csrf.rs (token verification for unsafe methods)
//!     → sanitize.rs (monitor inspection, body/query/params cleaning)
//!     → application
//! ```
//!
//! # Design Decisions
//! - Defense in depth: every gate is independent and must pass
//! - Enforcement fails closed, hardening fails open
//! - All state lives in one `pipeline::SecurityPipeline` per process

pub mod adaptive;
pub mod admission;
pub mod csrf;
pub mod ddos;
pub mod headers;
pub mod identity;
pub mod monitor;
pub mod pipeline;
pub mod rate_limit;
pub mod sanitize;
pub mod transport;

pub use identity::{AuthenticatedUser, ClientIdentity};
pub use monitor::SecurityMonitor;
pub use pipeline::{PipelineStats, SecurityPipeline};
