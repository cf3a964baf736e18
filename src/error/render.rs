//! HTML error pages.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::security::sanitize::escape_html;

#[derive(Debug, Clone)]
pub struct ErrorPage {
    pub status: u16,
    pub title: String,
    pub message: String,
    pub error_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template {0} not found")]
    MissingTemplate(String),
    #[error("render failed: {0}")]
    Failed(String),
}

/// Host template engine hook.
pub trait Renderer: Send + Sync {
    fn render(&self, page: &ErrorPage) -> Result<String, RenderError>;
}

/// Minimal self-contained page.
#[derive(Debug, Default)]
pub struct DefaultRenderer;

impl Renderer for DefaultRenderer {
    fn render(&self, page: &ErrorPage) -> Result<String, RenderError> {
        let reference = page
            .error_id
            .as_deref()
            .map(|id| format!("<p class=\"ref\">Reference: {}</p>", escape_html(id)))
            .unwrap_or_default();
        Ok(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{status} {title}</title></head>\n<body>\n<h1>{status} {title}</h1>\n<p>{message}</p>\n{reference}\n</body>\n</html>\n",
            status = page.status,
            title = escape_html(&page.title),
            message = escape_html(&page.message),
            reference = reference,
        ))
    }
}

/// Last-resort response when classification or rendering fails.
pub fn fallback_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Internal Server Error",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_escapes() {
        let page = ErrorPage {
            status: 404,
            title: "Not Found".into(),
            message: "<script>x</script>".into(),
            error_id: Some("abc".into()),
        };
        let html = DefaultRenderer.render(&page).unwrap();
        assert!(html.contains("404 Not Found"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Reference: abc"));
    }

    #[test]
    fn test_fallback_is_plain_500() {
        let response = fallback_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
