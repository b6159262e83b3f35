// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end dispatch scenarios against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use relay::error::ErrorCode;
use relay::model::{AgentBasic, JobOutcome, JobStatus};
use relay::presence::{spawn_offline_watcher, PRESENCE_TTL};
use relay::test_support::{add_agent, job_input, StateBuilder};

#[tokio::test]
async fn submitted_job_runs_to_success() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = add_agent(&state, "u1", "A").await?;

    let job = state.dispatcher.submit("u1", job_input("A", "m1")).await?;
    assert_eq!(state.lifecycle.job(&job.id).await?.map(|j| j.status), Some(JobStatus::Queuing));

    let pulled = state.dispatcher.pull(&agent.id, "10.0.0.1").await?;
    let pulled = pulled.ok_or_else(|| anyhow::anyhow!("nothing delivered"))?;
    assert_eq!((pulled.id.as_str(), pulled.message.as_str()), (job.id.as_str(), "m1"));
    assert_eq!(state.lifecycle.job(&job.id).await?.map(|j| j.status), Some(JobStatus::Sent));

    state.dispatcher.report(&agent.id, &job.id, JobOutcome::Succeeded("ok".to_owned())).await?;
    let done = state.lifecycle.job(&job.id).await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result.as_deref(), Some("ok"));
    assert!(done.callback_at_ms.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_agent_has_its_queue_expired() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = add_agent(&state, "u1", "A").await?;
    // One poll establishes presence; the agent then goes quiet.
    state.dispatcher.pull(&agent.id, "10.0.0.1").await?;
    let j1 = state.dispatcher.submit("u1", job_input("A", "j1")).await?;
    let j2 = state.dispatcher.submit("u1", job_input("A", "j2")).await?;

    let shutdown = CancellationToken::new();
    let watcher =
        spawn_offline_watcher(Arc::clone(&state.presence), Duration::from_secs(1), shutdown.clone());
    tokio::time::sleep(PRESENCE_TTL - Duration::from_secs(10)).await;
    assert_eq!(state.lifecycle.job(&j1.id).await?.map(|j| j.status), Some(JobStatus::Queuing));

    tokio::time::sleep(Duration::from_secs(15)).await;
    for id in [&j1.id, &j2.id] {
        let job = state.lifecycle.job(id).await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert_eq!(job.status, JobStatus::Expired);
        assert!(job.expired_at_ms.is_some());
    }
    assert!(state.queue.pending(&agent.id).await?.is_empty());
    assert!(!state.presence.is_online(&agent.id).await);

    shutdown.cancel();
    watcher.await?;
    Ok(())
}

#[tokio::test]
async fn offline_drain_expires_exactly_once() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = add_agent(&state, "u1", "A").await?;
    let job = state.dispatcher.submit("u1", job_input("A", "j1")).await?;

    state.presence.handle_offline(&agent.id).await;
    let first = state.lifecycle.job(&job.id).await?.and_then(|j| j.expired_at_ms);
    assert!(first.is_some());

    assert!(!state.lifecycle.expire(&job.id).await?);
    state.presence.handle_offline(&agent.id).await;
    let again = state.lifecycle.job(&job.id).await?.and_then(|j| j.expired_at_ms);
    assert_eq!(first, again);
    Ok(())
}

#[tokio::test]
async fn alias_lookup_finds_agent() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = state
        .registry
        .agent_add("u1", AgentBasic { name: "builder".to_owned(), alias: Some("x".to_owned()), remark: None })
        .await?;
    assert_eq!(state.registry.find_agent_id_by_name("u1", "x").await?, Some(agent.id));
    Ok(())
}

#[tokio::test]
async fn online_agent_survives_delete() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = add_agent(&state, "u1", "A").await?;
    let job = state.dispatcher.submit("u1", job_input("A", "keep")).await?;
    state.dispatcher.pull(&agent.id, "10.0.0.1").await?;

    let err = state.registry.agent_delete(&agent.id).await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::Conflict));
    assert!(state.registry.agent(&agent.id).await?.is_some());
    assert_eq!(state.lifecycle.job(&job.id).await?.map(|j| j.status), Some(JobStatus::Sent));
    Ok(())
}

#[tokio::test]
async fn rotated_secret_is_refused() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let agent = add_agent(&state, "u1", "A").await?;
    assert_eq!(state.registry.authenticate(&agent.secret).await?, agent.id);

    let fresh = state.registry.agent_secret_reset(&agent.id).await?;
    assert_ne!(fresh, agent.secret);
    assert!(state.registry.authenticate(&agent.secret).await.is_err());
    Ok(())
}

fn reserved_name() -> impl Strategy<Value = String> {
    let names = [
        "admin", "agent", "agents", "all", "api", "help", "job", "jobs", "me", "root", "status",
        "system", "user",
    ];
    (proptest::sample::select(names.to_vec()), proptest::collection::vec(any::<bool>(), 8)).prop_map(
        |(name, upper)| {
            name.chars()
                .zip(upper.into_iter().cycle())
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn reserved_names_never_create_agents(name in reserved_name()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let (code, count) = rt.block_on(async {
            let (state, _rx) = StateBuilder::new().build();
            let code = add_agent(&state, "u1", &name).await.err().map(|e| e.code);
            let count = state.registry.user_agents("u1").await.map(|a| a.len()).unwrap_or(usize::MAX);
            (code, count)
        });
        prop_assert_eq!(code, Some(ErrorCode::InvalidInput));
        prop_assert_eq!(count, 0);
    }
}
