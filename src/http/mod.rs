//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (listeners, graceful shutdown)
//!     → security::pipeline (all security stages)
//!     → routes.rs (gallery application handlers)
//!     → response.rs (JSON rejection bodies used by the stages)
//! ```
//!
//! `request.rs` holds the body buffering and content negotiation helpers
//! shared by the CSRF, sanitizer and error stages.

pub mod request;
pub mod response;
pub mod routes;
pub mod server;

pub use routes::gallery_router;
pub use server::GuardServer;
