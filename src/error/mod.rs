//! Error taxonomy and the terminal error sink.
//!
//! # Data Flow
//! ```text
//! handler returns Err(AppError) / panics / no route
//!     → AppError::into_response (placeholder carrying the error)
//!     → handler::error_boundary
//!         → classify.rs (status, severity, category)
//!         → filter, transform, custom handlers
//!         → report.rs (dedup, pattern detection, notification throttling)
//!         → render.rs (JSON or HTML)
//! ```

pub mod classify;
pub mod handler;
pub mod notify;
pub mod render;
pub mod report;

use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use classify::{classify, Classification};
pub use handler::{error_boundary, ErrorContext, ErrorHandler, ErrorHandlers, HandlerKey};
pub use report::{ErrorReport, ErrorReporter, ErrorStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Client,
    Server,
    Business,
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Client => "CLIENT",
            Category::Server => "SERVER",
            Category::Business => "BUSINESS",
            Category::System => "SYSTEM",
        }
    }
}

/// What went wrong. Every structured kind has a fixed classification;
/// `Http` carries an ad-hoc status and `Foreign` names an error raised by
/// a collaborator (ORM, upload parser, token library).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimited,
    CsrfRejected,
    PayloadTooLarge,
    BadRequest,
    Database,
    ExternalService,
    Configuration,
    Internal,
    Http(u16),
    Foreign(String),
}

impl ErrorKind {
    /// Stable type name, used in error ids and handler lookup.
    pub fn name(&self) -> String {
        match self {
            ErrorKind::Validation => "ValidationError".to_string(),
            ErrorKind::Authentication => "AuthenticationError".to_string(),
            ErrorKind::Authorization => "AuthorizationError".to_string(),
            ErrorKind::NotFound => "NotFoundError".to_string(),
            ErrorKind::Conflict => "ConflictError".to_string(),
            ErrorKind::RateLimited => "RateLimitError".to_string(),
            ErrorKind::CsrfRejected => "CsrfError".to_string(),
            ErrorKind::PayloadTooLarge => "PayloadTooLargeError".to_string(),
            ErrorKind::BadRequest => "BadRequestError".to_string(),
            ErrorKind::Database => "DatabaseError".to_string(),
            ErrorKind::ExternalService => "ExternalServiceError".to_string(),
            ErrorKind::Configuration => "ConfigurationError".to_string(),
            ErrorKind::Internal => "InternalError".to_string(),
            ErrorKind::Http(status) => format!("HttpError{}", status),
            ErrorKind::Foreign(name) => name.clone(),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application error returned by handlers.
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
    pub source: Option<BoxError>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("code", &self.code)
            .field("details", &self.details)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Ad-hoc error carrying only a status code.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http(status.as_u16()), message)
    }

    /// Error raised by a collaborator, classified by name.
    pub fn foreign(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Foreign(name.into()), message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn name(&self) -> String {
        self.kind.name()
    }

    /// Copy with user-facing text replaced. The source survives as its text.
    pub fn rewritten(&self, message: String, code: Option<String>) -> AppError {
        AppError {
            kind: self.kind.clone(),
            message,
            code,
            details: self.details.clone(),
            source: self
                .source
                .as_ref()
                .map(|s| Box::new(SourceText(s.to_string())) as BoxError),
        }
    }
}

#[derive(Debug)]
struct SourceText(String);

impl fmt::Display for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SourceText {}

/// Response extension carrying the error to the boundary.
#[derive(Clone)]
pub struct ErrorCarrier(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(classify(&self).status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        response.extensions_mut().insert(ErrorCarrier(Arc::new(self)));
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;
