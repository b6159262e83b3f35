// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::model::{JobSource, JobStatus};
use crate::store::{JsonRecords, RecordStore};
use crate::test_support::{add_agent, job_input, EphemeralOp, FlakyEphemeral, StateBuilder};

/// A `queuing` record created long ago with no queue item behind it.
async fn orphan(records: &JsonRecords, agent_id: &str) -> anyhow::Result<Job> {
    let mut job = Job::new("u1", agent_id, JobSource::Api, "orphan");
    job.created_at_ms = 1_000;
    records.insert_job(job.clone()).await?;
    Ok(job)
}

async fn status(state: &crate::state::AppState, id: &str) -> Option<JobStatus> {
    state.lifecycle.job(id).await.ok().flatten().map(|j| j.status)
}

#[tokio::test]
async fn expires_orphaned_jobs_only() -> anyhow::Result<()> {
    let records = Arc::new(JsonRecords::in_memory());
    let (state, _rx) = StateBuilder::new().records(records.clone()).build();
    let agent = add_agent(&state, "u1", "builder").await?;

    let lost = orphan(&records, &agent.id).await?;
    let queued = state.dispatcher.submit("u1", job_input("builder", "waiting")).await?;

    let reconciler = Reconciler::new(
        Arc::clone(&state.lifecycle),
        Arc::clone(&state.queue),
        Duration::ZERO,
    );
    // `queued` was created this millisecond or later; make sure the cutoff passes it.
    tokio::time::sleep(Duration::from_millis(5)).await;

    // First miss only marks the job.
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(status(&state, &lost.id).await, Some(JobStatus::Queuing));
    assert_eq!(reconciler.run_once().await?, 1);
    assert_eq!(status(&state, &lost.id).await, Some(JobStatus::Expired));
    assert_eq!(status(&state, &queued.id).await, Some(JobStatus::Queuing));
    Ok(())
}

#[tokio::test]
async fn young_jobs_are_left_alone() -> anyhow::Result<()> {
    let records = Arc::new(JsonRecords::in_memory());
    let (state, _rx) = StateBuilder::new().records(records.clone()).build();
    let agent = add_agent(&state, "u1", "builder").await?;

    let mut fresh = Job::new("u1", &agent.id, JobSource::Api, "fresh");
    fresh.created_at_ms = crate::model::epoch_ms();
    records.insert_job(fresh.clone()).await?;

    let reconciler =
        Reconciler::new(Arc::clone(&state.lifecycle), Arc::clone(&state.queue), Duration::from_secs(600));
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(status(&state, &fresh.id).await, Some(JobStatus::Queuing));
    Ok(())
}

#[tokio::test]
async fn unreadable_queue_skips_agent() -> anyhow::Result<()> {
    let records = Arc::new(JsonRecords::in_memory());
    let flaky = Arc::new(FlakyEphemeral::new());
    let (state, _rx) = StateBuilder::new().records(records.clone()).ephemeral(flaky.clone()).build();
    let agent = add_agent(&state, "u1", "builder").await?;
    let lost = orphan(&records, &agent.id).await?;

    let reconciler = Reconciler::new(Arc::clone(&state.lifecycle), Arc::clone(&state.queue), Duration::ZERO);
    flaky.fail(EphemeralOp::Range);
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(status(&state, &lost.id).await, Some(JobStatus::Queuing));

    flaky.heal(EphemeralOp::Range);
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(reconciler.run_once().await?, 1);
    Ok(())
}

#[tokio::test]
async fn popped_job_can_still_be_marked_sent() -> anyhow::Result<()> {
    let records = Arc::new(JsonRecords::in_memory());
    let (state, _rx) = StateBuilder::new().records(records.clone()).build();
    let agent = add_agent(&state, "u1", "builder").await?;

    let job = orphan(&records, &agent.id).await?;
    state.queue.enqueue(&agent.id, &job.basic()).await?;
    let reconciler = Reconciler::new(Arc::clone(&state.lifecycle), Arc::clone(&state.queue), Duration::ZERO);

    // A pull is between pop and `sent` when the sweep runs.
    let popped = state.queue.pop(&agent.id).await?;
    assert_eq!(popped.map(|b| b.id), Some(job.id.clone()));
    assert_eq!(reconciler.run_once().await?, 0);

    let sent = state.lifecycle.mark_sent(&job.id).await?;
    assert_eq!(sent.status, JobStatus::Sent);
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(status(&state, &job.id).await, Some(JobStatus::Sent));
    Ok(())
}

#[tokio::test]
async fn requeued_job_is_no_longer_suspect() -> anyhow::Result<()> {
    let records = Arc::new(JsonRecords::in_memory());
    let (state, _rx) = StateBuilder::new().records(records.clone()).build();
    let agent = add_agent(&state, "u1", "builder").await?;
    let job = orphan(&records, &agent.id).await?;
    let reconciler = Reconciler::new(Arc::clone(&state.lifecycle), Arc::clone(&state.queue), Duration::ZERO);

    assert_eq!(reconciler.run_once().await?, 0);
    state.queue.enqueue(&agent.id, &job.basic()).await?;
    assert_eq!(reconciler.run_once().await?, 0);

    // Missing again: the count restarts.
    state.queue.pop(&agent.id).await?;
    assert_eq!(reconciler.run_once().await?, 0);
    assert_eq!(status(&state, &job.id).await, Some(JobStatus::Queuing));
    assert_eq!(reconciler.run_once().await?, 1);
    Ok(())
}

#[tokio::test]
async fn reconciler_task_stops_on_shutdown() -> anyhow::Result<()> {
    let (state, _rx) = StateBuilder::new().build();
    let shutdown = CancellationToken::new();
    let handle =
        spawn_reconciler(Arc::clone(&state.reconciler), Duration::from_millis(10), shutdown.clone());
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}
