// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent liveness as a sliding-expiry marker in the ephemeral store.
//!
//! Every pull refreshes `agent:online:{id}` for [`PRESENCE_TTL`]. When the
//! marker lapses the offline watcher drains the agent's queue and expires
//! whatever was still waiting.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::failure::FailureSink;
use crate::lifecycle::JobLifecycle;
use crate::model::epoch_ms;
use crate::queue::JobQueue;
use crate::store::{bounded, EphemeralStore, RecordStore};

/// How long an agent stays online after its last pull.
pub const PRESENCE_TTL: Duration = Duration::from_secs(180);

const PRESENCE_PREFIX: &str = "agent:online:";

pub fn presence_key(agent_id: &str) -> String {
    format!("{PRESENCE_PREFIX}{agent_id}")
}

/// Agent id from a presence key, or `None` for any other key.
pub fn agent_from_presence_key(key: &str) -> Option<&str> {
    key.strip_prefix(PRESENCE_PREFIX).filter(|id| !id.is_empty())
}

/// What one offline drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items popped from the queue.
    pub drained: usize,
    /// Jobs moved from `queuing` to `expired`.
    pub expired: usize,
    /// The drain stopped early on a queue error.
    pub aborted: bool,
}

pub struct PresenceTracker {
    ephemeral: Arc<dyn EphemeralStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<JobQueue>,
    lifecycle: Arc<JobLifecycle>,
    failures: FailureSink,
    timeout: Duration,
}

impl PresenceTracker {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<JobQueue>,
        lifecycle: Arc<JobLifecycle>,
        failures: FailureSink,
        timeout: Duration,
    ) -> Self {
        Self { ephemeral, records, queue, lifecycle, failures, timeout }
    }

    /// Refresh the agent's presence marker. On the offline -> online edge the
    /// caller's address is recorded on the agent.
    ///
    /// Best-effort: store failures are reported, never returned.
    pub async fn mark_online(&self, agent_id: &str, ip: &str) {
        if !self.is_online(agent_id).await {
            tracing::info!(agent_id, ip, "agent online");
            if let Err(e) = bounded(self.timeout, self.records.set_agent_ip(agent_id, ip)).await {
                self.failures.report("presence", format!("record ip for agent {agent_id}: {e}"));
            }
        }
        let key = presence_key(agent_id);
        let stamp = (epoch_ms() / 1000).to_string().into_bytes();
        if let Err(e) = bounded(self.timeout, self.ephemeral.set_ex(&key, stamp, PRESENCE_TTL)).await {
            self.failures.report("presence", format!("refresh {key}: {e}"));
        }
    }

    /// Whether the agent's marker is live. A store failure reads as offline.
    pub async fn is_online(&self, agent_id: &str) -> bool {
        let key = presence_key(agent_id);
        match bounded(self.timeout, self.ephemeral.exists(&key)).await {
            Ok(found) => found,
            Err(e) => {
                self.failures.report("presence", format!("check {key}: {e}"));
                false
            }
        }
    }

    /// Drain the agent's queue, expiring each job, then stamp the agent's
    /// last activity.
    pub async fn handle_offline(&self, agent_id: &str) -> DrainSummary {
        let mut summary = DrainSummary::default();
        loop {
            let job = match self.queue.pop(agent_id).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(agent_id, err = %e, "offline drain aborted");
                    summary.aborted = true;
                    break;
                }
            };
            summary.drained += 1;
            match self.lifecycle.expire(&job.id).await {
                Ok(true) => summary.expired += 1,
                Ok(false) => {}
                Err(e) => {
                    // Store and transition errors were already reported by the lifecycle.
                    if e.code == ErrorCode::NotFound {
                        self.failures.report("presence", format!("drain agent {agent_id}: {e}"));
                    }
                    tracing::warn!(agent_id, job_id = %job.id, err = %e, "expire during drain failed");
                }
            }
        }

        if let Err(e) = bounded(self.timeout, self.records.set_agent_activated(agent_id, epoch_ms())).await
        {
            self.failures.report("presence", format!("record activity for agent {agent_id}: {e}"));
        }
        tracing::info!(
            agent_id,
            drained = summary.drained,
            expired = summary.expired,
            aborted = summary.aborted,
            "agent offline"
        );
        summary
    }

    /// Handle every presence marker that lapsed since the last sweep. Returns
    /// the number of agents drained.
    pub async fn sweep(&self) -> usize {
        let keys = match bounded(self.timeout, self.ephemeral.take_expired()).await {
            Ok(keys) => keys,
            Err(e) => {
                self.failures.report("presence", format!("read expired keys: {e}"));
                return 0;
            }
        };
        let mut drained = 0;
        for key in &keys {
            let Some(agent_id) = agent_from_presence_key(key) else {
                continue;
            };
            // The agent may have pulled again after the marker lapsed.
            if self.is_online(agent_id).await {
                tracing::debug!(agent_id, "presence lapsed but agent is back");
                continue;
            }
            self.handle_offline(agent_id).await;
            drained += 1;
        }
        drained
    }
}

/// Spawn the background task that turns lapsed presence markers into
/// offline drains.
pub fn spawn_offline_watcher(
    presence: Arc<PresenceTracker>,
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
            presence.sweep().await;
        }
        tracing::debug!("offline watcher stopped");
    })
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
