// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport: user routes, agent routes, and the status check.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all relay routes under `/api/v1`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let user = Router::new()
        .route("/jobs", get(http::list_jobs).post(http::submit_job))
        .route("/agents", get(http::list_agents).post(http::create_agent))
        .route("/agents/{id}", axum::routing::delete(http::delete_agent))
        .route("/agents/{id}/secret", get(http::agent_secret).post(http::reset_agent_secret))
        .route("/agents/{id}/jobs", get(http::agent_jobs))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::user_layer));

    let agent = Router::new()
        .route("/agent/job", get(http::pull_job))
        .route("/agent/jobs/{id}/succeed", put(http::succeed_job))
        .route("/agent/jobs/{id}/fail", put(http::fail_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::agent_layer));

    let api = Router::new().route("/status", get(http::status)).merge(user).merge(agent);

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
