// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic sweep for jobs stranded in `queuing`.
//!
//! The record store and the queue are written separately, so a crash or an
//! ephemeral-store loss can leave a `queuing` record whose queue item is gone.
//! Such a job can never be delivered or drained. Once it is older than the
//! stuck threshold and absent from its agent's queue on two consecutive
//! sweeps it is expired; a single miss may be a pull between pop and
//! `sent`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::lifecycle::JobLifecycle;
use crate::model::{epoch_ms, Job};
use crate::queue::JobQueue;

pub struct Reconciler {
    lifecycle: Arc<JobLifecycle>,
    queue: Arc<JobQueue>,
    stuck_after: Duration,
    /// Jobs found missing from their queue by the previous sweep.
    suspects: Mutex<HashSet<String>>,
}

impl Reconciler {
    pub fn new(lifecycle: Arc<JobLifecycle>, queue: Arc<JobQueue>, stuck_after: Duration) -> Self {
        Self { lifecycle, queue, stuck_after, suspects: Mutex::new(HashSet::new()) }
    }

    /// One sweep. Returns the number of jobs expired.
    pub async fn run_once(&self) -> Result<usize> {
        let previous = std::mem::take(&mut *self.suspects.lock());
        let cutoff = epoch_ms().saturating_sub(self.stuck_after.as_millis() as u64);
        let stale = self.lifecycle.queuing_before(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut by_agent: BTreeMap<&str, Vec<&Job>> = BTreeMap::new();
        for job in &stale {
            by_agent.entry(job.agent_id.as_str()).or_default().push(job);
        }

        let mut suspects = HashSet::new();
        let mut expired = 0;
        for (agent_id, jobs) in by_agent {
            // Skip the agent when its queue cannot be read; the next sweep retries.
            let Ok(pending) = self.queue.pending(agent_id).await else {
                suspects.extend(jobs.iter().filter(|j| previous.contains(&j.id)).map(|j| j.id.clone()));
                continue;
            };
            let queued: HashSet<&str> = pending.iter().map(|j| j.id.as_str()).collect();
            for job in jobs.into_iter().filter(|j| !queued.contains(j.id.as_str())) {
                if !previous.contains(&job.id) {
                    suspects.insert(job.id.clone());
                    continue;
                }
                match self.lifecycle.expire(&job.id).await {
                    Ok(true) => {
                        tracing::warn!(job_id = %job.id, agent_id, "expired orphaned queuing job");
                        expired += 1;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(job_id = %job.id, err = %e, "reconcile expire failed"),
                }
            }
        }
        *self.suspects.lock() = suspects;
        Ok(expired)
    }
}

/// Spawn the periodic reconciler.
pub fn spawn_reconciler(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            match reconciler.run_once().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "reconcile sweep finished"),
                Err(e) => tracing::warn!(err = %e, "reconcile sweep failed"),
            }
        }
        tracing::debug!("reconciler stopped");
    })
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
