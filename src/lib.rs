//! Layered request-security pipeline for the gallery web application.
//!
//! Rate limiting, DDoS detection, adaptive trust limits, CSRF protection,
//! HTTPS enforcement, security headers, input sanitization, security event
//! monitoring and the terminal error sink, all as axum middleware sharing
//! one [`SecurityPipeline`].
//!
//! All per-identity state is held in process memory. Counts are correct
//! for a single instance only; a multi-instance deployment needs an
//! external [`store::RateStore`].

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod session;
pub mod store;

pub use config::GuardConfig;
pub use error::{AppError, AppResult};
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use security::SecurityPipeline;
