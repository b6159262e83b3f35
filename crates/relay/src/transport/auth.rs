// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::RelayError;
use crate::state::AppState;

/// Header the fronting gateway sets to the authenticated user.
pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
}

/// The agent a request authenticated as.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub ip: String,
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())?.strip_prefix("Bearer ")
}

/// Validate the service bearer token, when one is configured.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), RelayError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match bearer(headers) {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(RelayError::unauthorized("invalid or missing bearer token")),
    }
}

/// Address of the caller: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for").and_then(|v| v.split(',').next()) {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_owned();
    }
    peer.map(|p| p.ip().to_string()).unwrap_or_else(|| "unknown".to_owned())
}

/// Middleware for user routes: service token (if configured) plus `X-User-Id`.
pub async fn user_layer(
    state: State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Err(e) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return e.into_response();
    }
    let user_id = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    let Some(user_id) = user_id else {
        return RelayError::unauthorized("missing X-User-Id header").into_response();
    };
    req.extensions_mut().insert(UserContext { user_id });
    next.run(req).await
}

/// Middleware for agent routes: `Authorization: Bearer <agent secret>`.
pub async fn agent_layer(
    state: State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(secret) = bearer(req.headers()).map(str::to_owned) else {
        return RelayError::unauthorized("missing agent secret").into_response();
    };
    let agent_id = match state.registry.authenticate(&secret).await {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let ip = client_ip(req.headers(), peer);
    req.extensions_mut().insert(AgentContext { agent_id, ip });
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
