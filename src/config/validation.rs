//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, thresholds ordered, trust bounds)
//! - Compile-check operator regexes before they reach the request path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use regex::Regex;
use thiserror::Error;

use crate::config::schema::{GuardConfig, RouteClass, PLACEHOLDER_API_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for class in RouteClass::ALL {
        let policy = config.rate_limit.classes.get(class);
        let field = format!("rate_limit.classes.{}", class.as_str());
        if policy.window_ms == 0 {
            errors.push(ValidationError::new(&field, "window_ms must be greater than 0"));
        }
        if policy.max == 0 {
            errors.push(ValidationError::new(&field, "max must be greater than 0"));
        }
    }

    if config.ddos.window_secs == 0 {
        errors.push(ValidationError::new("ddos.window_secs", "must be greater than 0"));
    }
    if config.ddos.warn_threshold >= config.ddos.block_threshold {
        errors.push(ValidationError::new(
            "ddos.warn_threshold",
            "must be lower than block_threshold",
        ));
    }

    if config.adaptive.initial_trust > 100 {
        errors.push(ValidationError::new("adaptive.initial_trust", "must be within 0..=100"));
    }
    if config.adaptive.violation_penalty == 0 {
        errors.push(ValidationError::new("adaptive.violation_penalty", "must be greater than 0"));
    }
    if config.adaptive.recovery_interval == 0 {
        errors.push(ValidationError::new("adaptive.recovery_interval", "must be greater than 0"));
    }
    if config.adaptive.window_secs == 0 {
        errors.push(ValidationError::new("adaptive.window_secs", "must be greater than 0"));
    }

    if config.monitor.max_events == 0 {
        errors.push(ValidationError::new("monitor.max_events", "must be greater than 0"));
    }
    if config.monitor.max_alerts == 0 {
        errors.push(ValidationError::new("monitor.max_alerts", "must be greater than 0"));
    }

    if config.errors.pattern_threshold < 2 {
        errors.push(ValidationError::new("errors.pattern_threshold", "must be at least 2"));
    }
    let patterns = config
        .errors
        .ignore_url_patterns
        .iter()
        .map(|p| ("errors.ignore_url_patterns", p))
        .chain(
            config
                .errors
                .ignore_user_agent_patterns
                .iter()
                .map(|p| ("errors.ignore_user_agent_patterns", p)),
        )
        .chain(config.errors.message_rules.iter().map(|r| ("errors.message_rules", &r.pattern)))
        .chain(config.errors.code_rules.iter().map(|r| ("errors.code_rules", &r.pattern)));
    for (field, pattern) in patterns {
        if let Err(e) = Regex::new(pattern) {
            errors.push(ValidationError::new(field, format!("invalid regex '{}': {}", pattern, e)));
        }
    }

    if config.maintenance.interval_secs == 0 {
        errors.push(ValidationError::new("maintenance.interval_secs", "must be greater than 0"));
    }

    if config.environment.is_production()
        && config.admin.enabled
        && config.admin.api_key == PLACEHOLDER_API_KEY
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "placeholder key must be replaced in production",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
