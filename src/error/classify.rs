//! Error classification, filtering and message rewriting.

use std::sync::Arc;

use regex::{Captures, NoExpand, Regex};

use super::{AppError, Category, ErrorKind, Severity};
use crate::config::{ErrorConfig, RewriteRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: u16,
    pub severity: Severity,
    pub category: Category,
}

impl Classification {
    const fn new(status: u16, severity: Severity, category: Category) -> Self {
        Self {
            status,
            severity,
            category,
        }
    }
}

const DEFAULT: Classification = Classification::new(500, Severity::High, Category::Server);

/// Collaborator error names with a known meaning.
const NAME_TABLE: &[(&str, Classification)] = &[
    ("ValidationError", Classification::new(400, Severity::Low, Category::Client)),
    ("CastError", Classification::new(400, Severity::Low, Category::Client)),
    ("SyntaxError", Classification::new(400, Severity::Low, Category::Client)),
    ("JsonWebTokenError", Classification::new(401, Severity::Medium, Category::Client)),
    ("TokenExpiredError", Classification::new(401, Severity::Low, Category::Client)),
    ("UnauthorizedError", Classification::new(401, Severity::Medium, Category::Client)),
    ("ForbiddenError", Classification::new(403, Severity::Medium, Category::Client)),
    ("NotFoundError", Classification::new(404, Severity::Low, Category::Client)),
    ("ConflictError", Classification::new(409, Severity::Low, Category::Business)),
    ("MulterError", Classification::new(413, Severity::Low, Category::Client)),
    ("SequelizeValidationError", Classification::new(400, Severity::Low, Category::Client)),
    ("SequelizeUniqueConstraintError", Classification::new(409, Severity::Low, Category::Business)),
    ("SequelizeDatabaseError", Classification::new(500, Severity::High, Category::System)),
    ("SequelizeConnectionError", Classification::new(503, Severity::Critical, Category::System)),
    ("TypeError", Classification::new(500, Severity::High, Category::Server)),
    ("ReferenceError", Classification::new(500, Severity::High, Category::Server)),
    ("RangeError", Classification::new(500, Severity::Medium, Category::Server)),
];

fn by_status(status: u16) -> Classification {
    match status {
        401 | 403 => Classification::new(status, Severity::Medium, Category::Client),
        400..=499 => Classification::new(status, Severity::Low, Category::Client),
        503 => Classification::new(status, Severity::Critical, Category::System),
        500..=599 => Classification::new(status, Severity::High, Category::Server),
        _ => DEFAULT,
    }
}

/// Resolve status, severity and category. Structured kinds map directly,
/// ad-hoc `Http` errors by their status, collaborator errors by name, and
/// everything else falls back to 500/HIGH/SERVER.
pub fn classify(err: &AppError) -> Classification {
    use Category::*;
    use Severity::*;

    match &err.kind {
        ErrorKind::Validation => Classification::new(400, Low, Client),
        ErrorKind::Authentication => Classification::new(401, Medium, Client),
        ErrorKind::Authorization => Classification::new(403, Medium, Client),
        ErrorKind::NotFound => Classification::new(404, Low, Client),
        ErrorKind::Conflict => Classification::new(409, Low, Business),
        ErrorKind::RateLimited => Classification::new(429, Low, Client),
        ErrorKind::CsrfRejected => Classification::new(403, Medium, Client),
        ErrorKind::PayloadTooLarge => Classification::new(413, Low, Client),
        ErrorKind::BadRequest => Classification::new(400, Low, Client),
        ErrorKind::Database => Classification::new(500, High, System),
        ErrorKind::ExternalService => Classification::new(502, High, System),
        ErrorKind::Configuration => Classification::new(500, Critical, System),
        ErrorKind::Internal => DEFAULT,
        ErrorKind::Http(status) => by_status(*status),
        ErrorKind::Foreign(name) => NAME_TABLE
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, class)| *class)
            .unwrap_or(DEFAULT),
    }
}

/// Request attributes the filter looks at.
pub struct FilterInput<'a> {
    pub status: u16,
    pub path: &'a str,
    pub user_agent: Option<&'a str>,
}

/// Drops errors before they are logged or reported.
#[derive(Debug, Default)]
pub struct ErrorFilter {
    ignore_status: Vec<u16>,
    only_status: Vec<u16>,
    url_patterns: Vec<Regex>,
    ua_substrings: Vec<String>,
    ua_patterns: Vec<Regex>,
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Skipping invalid error filter pattern");
                None
            }
        })
        .collect()
}

impl ErrorFilter {
    pub fn new(config: &ErrorConfig) -> Self {
        Self {
            ignore_status: config.ignore_status.clone(),
            only_status: config.only_status.clone(),
            url_patterns: compile_all(&config.ignore_url_patterns),
            ua_substrings: config
                .ignore_user_agents
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            ua_patterns: compile_all(&config.ignore_user_agent_patterns),
        }
    }

    pub fn should_ignore(&self, input: &FilterInput<'_>) -> bool {
        if self.ignore_status.contains(&input.status) {
            return true;
        }
        if !self.only_status.is_empty() && !self.only_status.contains(&input.status) {
            return true;
        }
        if self.url_patterns.iter().any(|re| re.is_match(input.path)) {
            return true;
        }
        if let Some(agent) = input.user_agent {
            let lowered = agent.to_ascii_lowercase();
            if self.ua_substrings.iter().any(|s| lowered.contains(s.as_str())) {
                return true;
            }
            if self.ua_patterns.iter().any(|re| re.is_match(agent)) {
                return true;
            }
        }
        false
    }
}

pub type ComputedReplacement = Arc<dyn Fn(&Captures<'_>) -> String + Send + Sync>;

#[derive(Clone)]
pub enum Replacement {
    Literal(String),
    Computed(ComputedReplacement),
}

/// Regex rewrite applied to error messages or codes.
#[derive(Clone)]
pub struct Rewrite {
    pattern: Regex,
    replacement: Replacement,
}

impl Rewrite {
    pub fn literal(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: Replacement::Literal(replacement.into()),
        })
    }

    pub fn computed(
        pattern: &str,
        f: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: Replacement::Computed(Arc::new(f)),
        })
    }

    pub fn apply(&self, input: &str) -> String {
        match &self.replacement {
            Replacement::Literal(text) => self.pattern.replace_all(input, NoExpand(text)).into_owned(),
            Replacement::Computed(f) => self
                .pattern
                .replace_all(input, |caps: &Captures<'_>| f(caps))
                .into_owned(),
        }
    }
}

pub fn compile_rules(rules: &[RewriteRule]) -> Vec<Rewrite> {
    rules
        .iter()
        .filter_map(|rule| match Rewrite::literal(&rule.pattern, rule.replacement.clone()) {
            Ok(rw) => Some(rw),
            Err(e) => {
                tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping invalid rewrite rule");
                None
            }
        })
        .collect()
}

pub fn rewrite_all(rules: &[Rewrite], input: &str) -> String {
    rules
        .iter()
        .fold(input.to_string(), |acc, rule| rule.apply(&acc))
}
