//! Request inspection helpers shared by the security layers.
//!
//! # Responsibilities
//! - Content negotiation (JSON vs. HTML clients)
//! - Buffer and parse request bodies (JSON and url-encoded forms)
//! - Rebuild a request after its body has been consumed
//!
//! # Design Decisions
//! - Bodies are buffered up to the listener's `max_body_bytes`
//! - Unknown content types are left as raw bytes and never parsed

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, request::Parts, HeaderMap, Request},
};
use serde_json::{Map, Value};

/// True for XHR, `Accept: application/json`, `/api` paths and JSON bodies.
pub fn wants_json(headers: &HeaderMap, path: &str) -> bool {
    let header_contains = |name: header::HeaderName, needle: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains(needle))
            .unwrap_or(false)
    };

    let xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
        .unwrap_or(false);

    xhr || header_contains(header::ACCEPT, "application/json")
        || path.starts_with("/api")
        || header_contains(header::CONTENT_TYPE, "application/json")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Other,
}

pub fn body_kind(headers: &HeaderMap) -> BodyKind {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if content_type.starts_with("application/json") {
        BodyKind::Json
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        BodyKind::Form
    } else {
        BodyKind::Other
    }
}

/// Parse a url-encoded string into an ordered JSON object. A repeated key
/// becomes an array holding every value in arrival order.
pub fn parse_form(input: &[u8]) -> Value {
    let mut map = Map::new();
    for (k, v) in url::form_urlencoded::parse(input) {
        let v = Value::String(v.into_owned());
        match map.get_mut(k.as_ref()) {
            Some(Value::Array(values)) => values.push(v),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, v]);
            }
            None => {
                map.insert(k.into_owned(), v);
            }
        }
    }
    Value::Object(map)
}

/// Parse a buffered body according to its content type.
pub fn parse_body(kind: BodyKind, bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match kind {
        BodyKind::Json => serde_json::from_slice(bytes).ok(),
        BodyKind::Form => Some(parse_form(bytes)),
        BodyKind::Other => None,
    }
}

/// Serialize a value back into the encoding of `kind`.
pub fn encode_body(kind: BodyKind, value: &Value) -> Option<Vec<u8>> {
    match kind {
        BodyKind::Json => serde_json::to_vec(value).ok(),
        BodyKind::Form => {
            let object = value.as_object()?;
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in object {
                match v {
                    Value::Array(values) => {
                        for item in values {
                            serializer.append_pair(k, &form_scalar(item));
                        }
                    }
                    other => {
                        serializer.append_pair(k, &form_scalar(other));
                    }
                }
            }
            Some(serializer.finish().into_bytes())
        }
        BodyKind::Other => None,
    }
}

fn form_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Query string parsed as an ordered JSON object.
pub fn parse_query(query: Option<&str>) -> Value {
    parse_form(query.unwrap_or("").as_bytes())
}

/// Error returned when a body exceeds the buffering limit.
#[derive(Debug, thiserror::Error)]
#[error("request body exceeds {limit} bytes")]
pub struct BodyTooLarge {
    pub limit: usize,
}

/// Consume the body, returning the head and the buffered bytes.
pub async fn buffer(request: Request<Body>, limit: usize) -> Result<(Parts, Bytes), BodyTooLarge> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(|_| BodyTooLarge { limit })?;
    Ok((parts, bytes))
}

/// Reassemble a request, fixing `Content-Length` for the new body.
pub fn rebuild(mut parts: Parts, bytes: Bytes) -> Request<Body> {
    if parts.headers.contains_key(header::CONTENT_LENGTH) || !bytes.is_empty() {
        parts.headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(bytes.len()));
    }
    Request::from_parts(parts, Body::from(bytes))
}
