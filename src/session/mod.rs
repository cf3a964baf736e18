//! Cookie-backed sessions.
//!
//! The session middleware resolves the `gg.sid` cookie to a live session,
//! creating one when the cookie is missing or stale, and exposes a
//! [`Session`] handle in the request extensions. The CSRF guard keeps its
//! per-session secret here and browser rejections leave flash messages.

pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::SessionConfig;

pub use store::{SessionData, SessionStore};

/// Request-scoped handle to one session.
#[derive(Clone)]
pub struct Session {
    id: String,
    store: Arc<SessionStore>,
}

impl Session {
    pub fn new(id: String, store: Arc<SessionStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.id, key)
    }

    pub fn insert(&self, key: &str, value: String) {
        self.store.insert(&self.id, key, value)
    }

    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> String) -> String {
        self.store.get_or_insert_with(&self.id, key, init)
    }

    pub fn flash(&self, message: impl Into<String>) {
        self.store.push_flash(&self.id, message.into())
    }

    pub fn take_flash(&self) -> Vec<String> {
        self.store.take_flash(&self.id)
    }
}

pub struct SessionManager {
    config: SessionConfig,
    store: Arc<SessionStore>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let store = Arc::new(SessionStore::new(Duration::from_secs(config.idle_ttl_secs)));
        Self { config, store }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    pub fn prune(&self, now: Instant) -> usize {
        self.store.prune(now)
    }

    fn set_cookie(&self, id: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.config.cookie_name, id
        ))
        .ok()
    }
}

/// Value of cookie `name` from the `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn session_middleware(
    State(manager): State<Arc<SessionManager>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let existing = cookie_value(request.headers(), manager.cookie_name())
        .filter(|id| manager.store.touch(id));
    let (id, is_new) = match existing {
        Some(id) => (id, false),
        None => (manager.store.create(), true),
    };

    request
        .extensions_mut()
        .insert(Session::new(id.clone(), manager.store.clone()));

    let mut response = next.run(request).await;
    if is_new {
        if let Some(cookie) = manager.set_cookie(&id) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response
}
