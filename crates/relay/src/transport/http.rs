// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for users and agents.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::model::{Agent, AgentBasic, JobInput, JobOutcome};
use crate::state::AppState;
use crate::transport::auth::{AgentContext, UserContext};

// -- Request/Response types ---------------------------------------------------

/// An agent as shown to its owner. Never carries the secret.
#[derive(Debug, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at_ms: Option<u64>,
    pub created_at_ms: u64,
}

impl From<&Agent> for AgentInfo {
    fn from(a: &Agent) -> Self {
        Self {
            id: a.id.clone(),
            name: a.name.clone(),
            alias: a.alias.clone(),
            remark: a.remark.clone(),
            ip: a.ip.clone(),
            activated_at_ms: a.activated_at_ms,
            created_at_ms: a.created_at_ms,
        }
    }
}

/// Returned once on creation; the only listing that includes the secret.
#[derive(Debug, Serialize)]
pub struct CreatedAgent {
    #[serde(flatten)]
    pub agent: AgentInfo,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    pub secret: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportRequest {
    #[serde(default)]
    pub result: String,
}

type ApiResult<T> = Result<T, RelayError>;

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/status`
pub async fn status() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `POST /api/v1/jobs`
pub async fn submit_job(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    input: Result<Json<JobInput>, JsonRejection>,
) -> ApiResult<StatusCode> {
    s.dispatcher.submit(&user.user_id, json_body(input)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/jobs`
pub async fn list_jobs(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> ApiResult<Response> {
    let jobs = s.lifecycle.user_jobs(&user.user_id).await?;
    Ok(Json(jobs).into_response())
}

/// `POST /api/v1/agents`
pub async fn create_agent(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    basic: Result<Json<AgentBasic>, JsonRejection>,
) -> ApiResult<Response> {
    let agent = s.registry.agent_add(&user.user_id, json_body(basic)?).await?;
    let body = CreatedAgent { agent: AgentInfo::from(&agent), secret: agent.secret };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// `GET /api/v1/agents`
pub async fn list_agents(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> ApiResult<Json<Vec<AgentInfo>>> {
    let agents = s.registry.user_agents(&user.user_id).await?;
    Ok(Json(agents.iter().map(AgentInfo::from).collect()))
}

/// `DELETE /api/v1/agents/{id}`
pub async fn delete_agent(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    s.registry.owned_agent(&user.user_id, &id).await?;
    s.registry.agent_delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/v1/agents/{id}/secret`
pub async fn agent_secret(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<SecretResponse>> {
    let agent = s.registry.owned_agent(&user.user_id, &id).await?;
    Ok(Json(SecretResponse { secret: agent.secret }))
}

/// `POST /api/v1/agents/{id}/secret`
pub async fn reset_agent_secret(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<SecretResponse>> {
    s.registry.owned_agent(&user.user_id, &id).await?;
    let secret = s.registry.agent_secret_reset(&id).await?;
    Ok(Json(SecretResponse { secret }))
}

/// `GET /api/v1/agents/{id}/jobs`
pub async fn agent_jobs(
    State(s): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    s.registry.owned_agent(&user.user_id, &id).await?;
    let jobs = s.lifecycle.agent_jobs(&id).await?;
    Ok(Json(jobs).into_response())
}

/// `GET /api/v1/agent/job`: poll for work. Doubles as the presence heartbeat.
pub async fn pull_job(
    State(s): State<Arc<AppState>>,
    Extension(agent): Extension<AgentContext>,
) -> ApiResult<Response> {
    match s.dispatcher.pull(&agent.agent_id, &agent.ip).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `PUT /api/v1/agent/jobs/{id}/succeed`
pub async fn succeed_job(
    State(s): State<Arc<AppState>>,
    Extension(agent): Extension<AgentContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let req = parse_report(&body)?;
    s.dispatcher.report(&agent.agent_id, &id, JobOutcome::Succeeded(req.result)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/agent/jobs/{id}/fail`
pub async fn fail_job(
    State(s): State<Arc<AppState>>,
    Extension(agent): Extension<AgentContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let req = parse_report(&body)?;
    s.dispatcher.report(&agent.agent_id, &id, JobOutcome::Failed(req.result)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body rejections use the same envelope as every other error.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, RelayError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(RelayError::invalid_input("InvalidBody", rejection.body_text())),
    }
}

/// An empty body reports an empty result.
fn parse_report(body: &[u8]) -> Result<ReportRequest, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReportRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| RelayError::invalid_input("InvalidBody", format!("invalid report body: {e}")))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
