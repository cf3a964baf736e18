//! Canonical rejection responses.
//!
//! Every security layer that refuses a request answers with the same JSON
//! envelope: `{ success, message, code, statusCode }`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub fn json_rejection(status: StatusCode, message: &str, code: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "message": message,
            "code": code,
            "statusCode": status.as_u16(),
        })),
    )
        .into_response()
}

/// 429 with `Retry-After`.
pub fn too_many_requests(message: &str, code: &str, retry_after_secs: u64) -> Response {
    let mut response = json_rejection(StatusCode::TOO_MANY_REQUESTS, message, code);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

pub fn forbidden(message: &str, code: &str) -> Response {
    json_rejection(StatusCode::FORBIDDEN, message, code)
}

pub fn bad_request(message: &str, code: &str) -> Response {
    json_rejection(StatusCode::BAD_REQUEST, message, code)
}

pub fn payload_too_large(limit: usize) -> Response {
    json_rejection(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {} bytes", limit),
        "PAYLOAD_TOO_LARGE",
    )
}
