//! Client identity derivation.
//!
//! The identity keys every per-client counter: rate windows, trust profiles
//! and DDoS windows. It is derived once per request by `identity_middleware`
//! and cached in the request extensions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use serde::Serialize;

use crate::config::IdentityConfig;

/// Proxy headers consulted in order when the peer is a trusted proxy.
const PROXY_HEADERS: [&str; 4] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "x-client-ip"];

/// Authenticated user id, supplied by the hosting application.
///
/// The guard never inserts this itself: sessions are loaded further in,
/// after admission has already keyed its counters. An auth layer that sits
/// outside `identity_middleware` (bearer tokens, mTLS, a gateway header it
/// trusts) inserts it into the request extensions, and every per-client
/// counter is then keyed `user:<id>` instead of by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientIdentity {
    ip: String,
    user: Option<String>,
}

impl ClientIdentity {
    pub fn new(ip: impl Into<String>, user: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            user,
        }
    }

    /// Derive from headers, the peer address and an optional user id.
    pub fn from_parts(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        user: Option<&str>,
        trust_proxy_headers: bool,
    ) -> Self {
        let forwarded = if trust_proxy_headers {
            PROXY_HEADERS.iter().find_map(|name| {
                headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
        } else {
            None
        };

        let ip = forwarded
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            ip,
            user: user.map(str::to_string),
        }
    }

    /// Cached identity, or one derived from the request without trusting proxies.
    pub fn of(request: &Request<Body>) -> Self {
        if let Some(identity) = request.extensions().get::<ClientIdentity>() {
            return identity.clone();
        }
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user = request.extensions().get::<AuthenticatedUser>().map(|u| u.0.as_str());
        Self::from_parts(request.headers(), peer, user, false)
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Counter key: the user id when authenticated, else the IP.
    pub fn key(&self) -> String {
        match &self.user {
            Some(user) => format!("user:{}", user),
            None => format!("ip:{}", self.ip),
        }
    }

    /// True when the identity or its IP appears in `list`.
    pub fn matches_any(&self, list: &[String]) -> bool {
        let key = self.key();
        list.iter().any(|entry| *entry == self.ip || *entry == key)
    }
}

pub async fn identity_middleware(
    State(config): State<Arc<IdentityConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());
    let identity = ClientIdentity::from_parts(request.headers(), peer, user.as_deref(), config.trusts(peer));
    request.extensions_mut().insert(identity);
    next.run(request).await
}
