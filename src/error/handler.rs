//! Terminal error sink.
//!
//! `ErrorHandler::handle` is the single entry point: filter, transform,
//! custom handler dispatch, report, render. Any failure inside it degrades
//! to a bare 500 so the request is always resolved.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::classify::{classify, Classification};
use super::render::{fallback_response, DefaultRenderer, ErrorPage, Renderer};
use super::report::{ErrorReporter, ReportContext};
use super::{AppError, ErrorCarrier, ErrorKind};
use crate::http::request::wants_json;
use crate::security::identity::ClientIdentity;
use crate::security::pipeline::SecurityPipeline;

const GENERIC_MESSAGE: &str = "Something went wrong. Please try again later.";

/// Request attributes captured before the handler runs.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub method: String,
    pub path: String,
    pub request_id: Option<String>,
    pub client: Option<String>,
    pub user_agent: Option<String>,
    pub wants_json: bool,
}

impl ErrorContext {
    pub fn from_request(request: &Request<Body>) -> Self {
        let headers = request.headers();
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let path = request.uri().path().to_string();
        Self {
            method: request.method().to_string(),
            wants_json: wants_json(headers, &path),
            request_id: header_str("x-request-id"),
            client: Some(ClientIdentity::of(request).key()),
            user_agent: header_str(header::USER_AGENT.as_str()),
            path,
        }
    }

    fn report_context(&self) -> ReportContext {
        ReportContext {
            method: self.method.clone(),
            path: self.path.clone(),
            request_id: self.request_id.clone(),
            client: self.client.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Dispatch key for operator-registered handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Kind(ErrorKind),
    Code(String),
    Status(u16),
}

pub type CustomHandler = Arc<dyn Fn(&AppError, &ErrorContext) -> Response + Send + Sync>;

/// Custom handlers, resolved by kind, then code, then status.
#[derive(Clone, Default)]
pub struct ErrorHandlers {
    table: HashMap<HandlerKey, CustomHandler>,
}

impl ErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        key: HandlerKey,
        handler: impl Fn(&AppError, &ErrorContext) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.table.insert(key, Arc::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn resolve(&self, err: &AppError, status: u16) -> Option<&CustomHandler> {
        self.table
            .get(&HandlerKey::Kind(err.kind.clone()))
            .or_else(|| {
                err.code
                    .as_ref()
                    .and_then(|code| self.table.get(&HandlerKey::Code(code.clone())))
            })
            .or_else(|| self.table.get(&HandlerKey::Status(status)))
    }
}

pub struct ErrorHandler {
    reporter: ErrorReporter,
    handlers: ErrorHandlers,
    renderer: Arc<dyn Renderer>,
    expose_details: bool,
}

impl ErrorHandler {
    pub fn new(reporter: ErrorReporter) -> Self {
        let expose_details = reporter.config().expose_details;
        Self {
            reporter,
            handlers: ErrorHandlers::default(),
            renderer: Arc::new(DefaultRenderer),
            expose_details,
        }
    }

    pub fn with_handlers(mut self, handlers: ErrorHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Resolve `err` into a response. The boundary sees whole responses
    /// before any byte is written, so there is always a head to replace.
    pub fn handle(&self, err: &AppError, ctx: &ErrorContext) -> Response {
        match catch_unwind(AssertUnwindSafe(|| self.resolve(err, ctx))) {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(path = %ctx.path, "Error handler failed, sending fallback response");
                fallback_response()
            }
        }
    }

    fn resolve(&self, err: &AppError, ctx: &ErrorContext) -> Response {
        let class = classify(err);
        let filtered = self
            .reporter
            .is_filtered(class.status, &ctx.path, ctx.user_agent.as_deref());

        // Everything past the filter only sees rewritten text.
        let shown = self.reporter.transform(err);
        if filtered {
            return self.respond(&shown, class, ctx, None);
        }

        if let Some(handler) = self.handlers.resolve(err, class.status) {
            return handler(&shown, ctx);
        }

        let outcome = self.reporter.report(&shown, class, ctx.report_context());
        self.respond(&shown, class, ctx, Some(&outcome.error_id))
    }

    fn respond(
        &self,
        err: &AppError,
        class: Classification,
        ctx: &ErrorContext,
        error_id: Option<&str>,
    ) -> Response {
        let status = StatusCode::from_u16(class.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut message = err.message.clone();
        let code = err.code.clone();
        if !self.expose_details && status.is_server_error() {
            message = GENERIC_MESSAGE.to_string();
        }

        if ctx.wants_json {
            let mut body = json!({
                "success": false,
                "message": message,
                "code": code,
                "statusCode": class.status,
                "errorId": error_id,
            });
            if self.expose_details {
                if let Value::Object(map) = &mut body {
                    map.insert("name".into(), Value::String(err.name()));
                    map.insert("severity".into(), json!(class.severity));
                    map.insert("category".into(), json!(class.category));
                    if let Some(details) = &err.details {
                        map.insert("details".into(), details.clone());
                    }
                    if let Some(source) = &err.source {
                        map.insert("cause".into(), Value::String(source.to_string()));
                    }
                }
            }
            return (status, Json(body)).into_response();
        }

        let page = ErrorPage {
            status: class.status,
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            error_id: error_id.map(str::to_string),
        };
        match self.renderer.render(&page) {
            Ok(html) => (status, Html(html)).into_response(),
            Err(e) => {
                tracing::error!(error = %e, status = class.status, "Error page render failed");
                fallback_response()
            }
        }
    }
}

/// Routes errors carried by handler responses through the pipeline's
/// `ErrorHandler`. Responses without an error pass untouched.
pub async fn error_boundary(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = ErrorContext::from_request(&request);
    let response = next.run(request).await;

    match response.extensions().get::<ErrorCarrier>() {
        Some(ErrorCarrier(err)) => pipeline.errors.handle(err, &ctx),
        None => response,
    }
}

/// `CatchPanicLayer` hook: a panic becomes an `Internal` error for the boundary.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");
    AppError::internal("Unexpected failure while handling request")
        .with_details(json!({ "panic": detail }))
        .into_response()
}

/// Router fallback for unknown routes.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Cannot find {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorConfig;
    use crate::error::classify::Rewrite;
    use crate::error::render::RenderError;
    use axum::body::to_bytes;

    fn handler(expose_details: bool) -> ErrorHandler {
        let mut config = ErrorConfig::default();
        config.expose_details = expose_details;
        ErrorHandler::new(ErrorReporter::new(config))
    }

    fn json_ctx(path: &str) -> ErrorContext {
        ErrorContext {
            method: "GET".into(),
            path: path.into(),
            wants_json: true,
            ..Default::default()
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_response_shape() {
        let h = handler(false);
        let err = AppError::validation("title is required").with_code("E_TITLE");
        let response = h.handle(&err, &json_ctx("/api/artworks"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "title is required");
        assert_eq!(body["code"], "E_TITLE");
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["errorId"].as_str().unwrap().len(), 16);
        assert!(body.get("name").is_none());
    }

    #[tokio::test]
    async fn test_server_errors_are_generic_without_details() {
        let h = handler(false);
        let err = AppError::new(ErrorKind::Database, "password authentication failed for user admin");
        let body = body_json(h.handle(&err, &json_ctx("/api/x"))).await;
        assert_eq!(body["message"], GENERIC_MESSAGE);
        assert_eq!(body["statusCode"], 500);
    }

    #[tokio::test]
    async fn test_details_exposed_in_development() {
        let h = handler(true);
        let err = AppError::internal("boom").with_details(json!({ "step": 3 }));
        let body = body_json(h.handle(&err, &json_ctx("/api/x"))).await;
        assert_eq!(body["message"], "boom");
        assert_eq!(body["name"], "InternalError");
        assert_eq!(body["details"]["step"], 3);
    }

    #[tokio::test]
    async fn test_html_page() {
        let h = handler(false);
        let ctx = ErrorContext {
            path: "/gallery/7".into(),
            ..Default::default()
        };
        let response = h.handle(&AppError::not_found("No such artwork"), &ctx);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("No such artwork"));
    }

    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn render(&self, _page: &ErrorPage) -> Result<String, RenderError> {
            Err(RenderError::MissingTemplate("error.html".into()))
        }
    }

    #[test]
    fn test_render_failure_falls_back() {
        let h = handler(false).with_renderer(Arc::new(BrokenRenderer));
        let response = h.handle(&AppError::not_found("x"), &ErrorContext::default());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_custom_handler_precedence() {
        let handlers = ErrorHandlers::new()
            .on(HandlerKey::Status(401), |_, _| StatusCode::IM_A_TEAPOT.into_response())
            .on(HandlerKey::Kind(ErrorKind::Authentication), |_, _| {
                (StatusCode::FOUND, [(header::LOCATION, "/user/login")]).into_response()
            });
        let h = handler(false).with_handlers(handlers);

        let response = h.handle(&AppError::unauthorized("login required"), &ErrorContext::default());
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = h.handle(&AppError::foreign("JsonWebTokenError", "bad token"), &ErrorContext::default());
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        // Custom handlers take over before reporting.
        assert_eq!(h.reporter().stats().total_errors, 0);
    }

    #[test]
    fn test_custom_handler_by_code() {
        let handlers = ErrorHandlers::new()
            .on(HandlerKey::Code("E_QUOTA".into()), |_, _| StatusCode::PAYMENT_REQUIRED.into_response());
        let h = handler(false).with_handlers(handlers);
        let err = AppError::validation("quota").with_code("E_QUOTA");
        assert_eq!(h.handle(&err, &ErrorContext::default()).status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_custom_handler_sees_rewritten_error() {
        let reporter = ErrorReporter::new(ErrorConfig::default())
            .with_message_rule(Rewrite::literal(r"relation \S+ does not exist", "resource unavailable").unwrap())
            .with_code_rule(Rewrite::literal("^PG", "DB").unwrap());
        let handlers = ErrorHandlers::new().on(HandlerKey::Code("PG42P01".into()), |err, _| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": err.message, "code": err.code })),
            )
                .into_response()
        });
        let h = ErrorHandler::new(reporter).with_handlers(handlers);

        let err = AppError::new(ErrorKind::Database, "relation artworks does not exist").with_code("PG42P01");
        let response = h.handle(&err, &json_ctx("/api/artworks"));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["message"], "resource unavailable");
        assert_eq!(body["code"], "DB42P01");
    }

    #[test]
    fn test_filtered_errors_are_not_reported() {
        let h = handler(false);
        let ctx = ErrorContext {
            path: "/favicon.ico".into(),
            ..Default::default()
        };
        let response = h.handle(&AppError::not_found("x"), &ctx);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(h.reporter().stats().total_errors, 0);
        assert_eq!(h.reporter().stats().filtered, 1);
    }

    #[test]
    fn test_panic_response_carries_internal_error() {
        let response = panic_response(Box::new("kaboom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let carrier = response.extensions().get::<ErrorCarrier>().unwrap();
        assert_eq!(carrier.0.kind, ErrorKind::Internal);
        assert_eq!(carrier.0.details.as_ref().unwrap()["panic"], "kaboom");
    }
}
