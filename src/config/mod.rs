//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! Environment (file `environment` key, else GUARD_ENV, else development)
//!     → schema.rs (GuardConfig::for_environment preset)
//!     → loader.rs (deep-merge operator TOML over the preset)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared via Arc to all components
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{config_from_env, load_config, load_config_str, ConfigError};
pub use schema::*;
