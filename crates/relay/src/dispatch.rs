// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three dispatch flows: a user submits, an agent pulls, an agent reports.

use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::lifecycle::JobLifecycle;
use crate::model::{Job, JobBasic, JobInput, JobOutcome, JobSource, MAX_MESSAGE_LEN};
use crate::presence::PresenceTracker;
use crate::queue::JobQueue;
use crate::registry::AgentRegistry;

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    presence: Arc<PresenceTracker>,
    queue: Arc<JobQueue>,
    lifecycle: Arc<JobLifecycle>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        presence: Arc<PresenceTracker>,
        queue: Arc<JobQueue>,
        lifecycle: Arc<JobLifecycle>,
    ) -> Self {
        Self { registry, presence, queue, lifecycle }
    }

    /// Record a job for one of the user's agents and queue it for delivery.
    ///
    /// If the queue write fails the new record is expired so it does not sit
    /// in `queuing` with nothing to deliver it.
    pub async fn submit(&self, user_id: &str, input: JobInput) -> Result<Job> {
        if input.message.trim().is_empty() {
            return Err(RelayError::invalid_input("MissingMessage", "job message is required"));
        }
        let len = input.message.chars().count();
        if len > MAX_MESSAGE_LEN {
            return Err(RelayError::invalid_input(
                "MessageTooLong",
                format!("job message is {len} characters; limit is {MAX_MESSAGE_LEN}"),
            ));
        }
        let target = input.agent.trim();
        if target.is_empty() {
            return Err(RelayError::invalid_input("MissingAgent", "agent name or alias is required"));
        }
        let source = match input.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse::<JobSource>().map_err(|e| RelayError::invalid_input("InvalidSource", e))?,
            None => JobSource::default(),
        };

        let Some(agent_id) = self.registry.find_agent_id_by_name(user_id, target).await? else {
            return Err(RelayError::not_found("AgentNotFound", format!("no agent named {target:?}")));
        };

        let job = self.lifecycle.create(user_id, &agent_id, source, &input.message).await?;
        if let Err(e) = self.queue.enqueue(&agent_id, &job.basic()).await {
            if let Err(expire_err) = self.lifecycle.expire(&job.id).await {
                tracing::warn!(job_id = %job.id, err = %expire_err, "could not expire unqueued job");
            }
            return Err(e);
        }
        tracing::info!(job_id = %job.id, agent_id = %agent_id, user_id, source = %source, "job submitted");
        Ok(job)
    }

    /// Refresh the agent's presence and hand it the oldest pending job.
    ///
    /// Once popped the job belongs to the agent, so it is delivered even when
    /// the `sent` transition fails; that failure is already reported.
    pub async fn pull(&self, agent_id: &str, ip: &str) -> Result<Option<JobBasic>> {
        self.presence.mark_online(agent_id, ip).await;
        let Some(job) = self.queue.pop(agent_id).await? else {
            return Ok(None);
        };
        match self.lifecycle.mark_sent(&job.id).await {
            Ok(_) => tracing::debug!(agent_id, job_id = %job.id, "job delivered"),
            Err(e) => {
                tracing::warn!(agent_id, job_id = %job.id, err = %e, "delivered without marking sent")
            }
        }
        Ok(Some(job))
    }

    /// Record the agent's outcome for a job it was sent.
    pub async fn report(&self, agent_id: &str, job_id: &str, outcome: JobOutcome) -> Result<Job> {
        match self.lifecycle.job(job_id).await? {
            Some(job) if job.agent_id == agent_id => {}
            _ => return Err(RelayError::not_found("JobNotFound", format!("job {job_id} not found"))),
        }
        let job = self.lifecycle.complete(job_id, outcome).await?;
        tracing::info!(agent_id, job_id, status = %job.status, "job reported");
        Ok(job)
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
