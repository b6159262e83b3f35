// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `relayd` binary.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use relay_specs::{ensure_crypto, RelayProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn create_agent(
    client: &reqwest::Client,
    relay: &RelayProcess,
    user: &str,
    name: &str,
) -> anyhow::Result<(String, String)> {
    let resp = client
        .post(format!("{}/agents", relay.api_url()))
        .header("x-user-id", user)
        .json(&json!({ "name": name }))
        .send()
        .await?;
    anyhow::ensure!(resp.status() == StatusCode::CREATED, "create agent: {}", resp.status());
    let body: Value = resp.json().await?;
    let id = body["id"].as_str().ok_or_else(|| anyhow::anyhow!("no id"))?.to_owned();
    let secret = body["secret"].as_str().ok_or_else(|| anyhow::anyhow!("no secret"))?.to_owned();
    Ok((id, secret))
}

#[tokio::test]
async fn status_answers_without_auth() -> anyhow::Result<()> {
    let relay = RelayProcess::build().auth_token("svc").spawn()?;
    relay.wait_ready(TIMEOUT).await?;

    let resp = reqwest::get(format!("{}/status", relay.api_url())).await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = reqwest::Client::new()
        .get(format!("{}/agents", relay.api_url()))
        .header("x-user-id", "u1")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn job_round_trip() -> anyhow::Result<()> {
    let relay = RelayProcess::start()?;
    relay.wait_ready(TIMEOUT).await?;
    ensure_crypto();
    let client = reqwest::Client::new();
    let (_, secret) = create_agent(&client, &relay, "u1", "builder").await?;

    let resp = client
        .post(format!("{}/jobs", relay.api_url()))
        .header("x-user-id", "u1")
        .json(&json!({ "message": "deploy", "agent": "builder" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client.get(format!("{}/agent/job", relay.api_url())).bearer_auth(&secret).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let job: Value = resp.json().await?;
    assert_eq!(job["message"], "deploy");
    let job_id = job["id"].as_str().ok_or_else(|| anyhow::anyhow!("no id"))?.to_owned();

    let resp = client
        .put(format!("{}/agent/jobs/{job_id}/succeed", relay.api_url()))
        .bearer_auth(&secret)
        .json(&json!({ "result": "ok" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let jobs: Vec<Value> = client
        .get(format!("{}/jobs", relay.api_url()))
        .header("x-user-id", "u1")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "succeeded");
    assert_eq!(jobs[0]["result"], "ok");
    Ok(())
}

#[tokio::test]
async fn agents_survive_restart_with_state_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relay.json");
    ensure_crypto();
    let client = reqwest::Client::new();

    let secret = {
        let relay = RelayProcess::build().state_file(&path).spawn()?;
        relay.wait_ready(TIMEOUT).await?;
        let (_, secret) = create_agent(&client, &relay, "u1", "builder").await?;
        secret
    };

    let relay = RelayProcess::build().state_file(&path).spawn()?;
    relay.wait_ready(TIMEOUT).await?;
    let agents: Vec<Value> = client
        .get(format!("{}/agents", relay.api_url()))
        .header("x-user-id", "u1")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["name"], "builder");

    let resp = client.get(format!("{}/agent/job", relay.api_url())).bearer_auth(&secret).send().await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn invalid_config_exits_with_usage_error() -> anyhow::Result<()> {
    let mut relay = RelayProcess::build().watch_ms(0).spawn()?;
    let status = relay.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}
