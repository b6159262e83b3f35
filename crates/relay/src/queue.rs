// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent FIFO delivery queue of protobuf-encoded [`JobBasic`] items.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;

use crate::error::{RelayError, Result};
use crate::failure::FailureSink;
use crate::model::JobBasic;
use crate::store::{bounded, EphemeralStore};

/// Ephemeral-store key holding an agent's pending jobs.
pub fn queue_key(agent_id: &str) -> String {
    format!("agent:queue:{agent_id}")
}

pub struct JobQueue {
    store: Arc<dyn EphemeralStore>,
    failures: FailureSink,
    timeout: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn EphemeralStore>, failures: FailureSink, timeout: Duration) -> Self {
        Self { store, failures, timeout }
    }

    /// Append a job to the tail of the agent's queue.
    pub async fn enqueue(&self, agent_id: &str, job: &JobBasic) -> Result<()> {
        let key = queue_key(agent_id);
        if let Err(e) = bounded(self.timeout, self.store.push_back(&key, job.encode_to_vec())).await {
            self.failures.report("queue", format!("push job {} to {key}: {e}", job.id));
            return Err(e.into());
        }
        tracing::debug!(agent_id, job_id = %job.id, "job enqueued");
        Ok(())
    }

    /// Remove and return the oldest pending job, or `None` when the queue is empty.
    ///
    /// An item that fails to decode is consumed and surfaced as an
    /// infrastructure error.
    pub async fn pop(&self, agent_id: &str) -> Result<Option<JobBasic>> {
        let key = queue_key(agent_id);
        let data = match bounded(self.timeout, self.store.pop_front(&key)).await {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.failures.report("queue", format!("pop job from {key}: {e}"));
                return Err(e.into());
            }
        };
        match JobBasic::decode(data.as_slice()) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                self.failures.report("queue", format!("decode job from {key}: {e}"));
                Err(RelayError::infrastructure(format!("corrupt queue item in {key}: {e}")))
            }
        }
    }

    /// Non-destructive view of the agent's queue, oldest first. Undecodable
    /// items are skipped and reported.
    pub async fn pending(&self, agent_id: &str) -> Result<Vec<JobBasic>> {
        let key = queue_key(agent_id);
        let items = bounded(self.timeout, self.store.range(&key)).await.map_err(|e| {
            self.failures.report("queue", format!("read {key}: {e}"));
            RelayError::from(e)
        })?;
        let mut jobs = Vec::with_capacity(items.len());
        for data in items {
            match JobBasic::decode(data.as_slice()) {
                Ok(job) => jobs.push(job),
                Err(e) => self.failures.report("queue", format!("decode job from {key}: {e}")),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
