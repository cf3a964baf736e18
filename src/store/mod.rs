//! In-process state primitives shared by the security components.
//!
//! # Data Flow
//! ```text
//! rate_limit / ddos / adaptive / error dedup
//!     → expiring.rs (keyed map with idle TTL, synchronous critical sections)
//!     → window.rs (sliding timestamp windows + swappable rate store)
//! ```
//!
//! # Design Decisions
//! - One tested primitive instead of an ad-hoc map per component
//! - Every read-modify-write runs under a single lock acquisition
//! - State is process-local: counts are only correct for a single instance.
//!   Multi-instance deployments need an external `RateStore` implementation.

pub mod expiring;
pub mod window;

pub use expiring::ExpiringMap;
pub use window::{MemoryRateStore, RateStore, RateWindow, WindowState};
