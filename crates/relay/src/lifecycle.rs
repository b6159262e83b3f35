// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable job records and the job state machine.
//!
//! ```text
//! queuing --(agent pulls)--> sent
//! queuing --(agent offline before pull)--> expired*
//! sent    --(agent reports success)--> succeeded*
//! sent    --(agent reports failure)--> failed*
//! ```
//!
//! Every transition is a compare-and-set in the record store, so status and
//! its timestamp change together and concurrent callers get one winner.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::failure::FailureSink;
use crate::model::{
    epoch_ms, truncate_chars, Job, JobOutcome, JobSource, JobStatus, JobTransition,
    TransitionOutcome, MAX_RESULT_LEN,
};
use crate::store::{bounded, RecordStore, StoreFuture};

pub struct JobLifecycle {
    records: Arc<dyn RecordStore>,
    failures: FailureSink,
    timeout: Duration,
}

impl JobLifecycle {
    pub fn new(records: Arc<dyn RecordStore>, failures: FailureSink, timeout: Duration) -> Self {
        Self { records, failures, timeout }
    }

    /// Persist a new job in `queuing`.
    pub async fn create(
        &self,
        user_id: &str,
        agent_id: &str,
        source: JobSource,
        message: &str,
    ) -> Result<Job> {
        let job = Job::new(user_id, agent_id, source, message);
        self.call(self.records.insert_job(job.clone())).await?;
        tracing::debug!(job_id = %job.id, agent_id, "job created");
        Ok(job)
    }

    /// `queuing -> sent`.
    pub async fn mark_sent(&self, job_id: &str) -> Result<Job> {
        match self.transition(job_id, JobStatus::Queuing, JobStatus::Sent, None).await? {
            TransitionOutcome::Applied(job) => Ok(job),
            TransitionOutcome::Rejected(status) => {
                Err(self.invalid(job_id, status, JobStatus::Sent))
            }
            TransitionOutcome::Missing => Err(job_not_found(job_id)),
        }
    }

    /// `queuing -> expired`. Returns `false` when the job was already terminal,
    /// which is not an error so a drain can safely see the same job twice.
    pub async fn expire(&self, job_id: &str) -> Result<bool> {
        match self.transition(job_id, JobStatus::Queuing, JobStatus::Expired, None).await? {
            TransitionOutcome::Applied(_) => {
                tracing::debug!(job_id, "job expired");
                Ok(true)
            }
            TransitionOutcome::Rejected(status) if status.is_terminal() => Ok(false),
            TransitionOutcome::Rejected(status) => {
                Err(self.invalid(job_id, status, JobStatus::Expired))
            }
            TransitionOutcome::Missing => Err(job_not_found(job_id)),
        }
    }

    /// `sent -> succeeded | failed`, recording the result and callback time.
    pub async fn complete(&self, job_id: &str, outcome: JobOutcome) -> Result<Job> {
        let to = outcome.status();
        let result = truncate_chars(outcome.into_result(), MAX_RESULT_LEN);
        match self.transition(job_id, JobStatus::Sent, to, Some(result)).await? {
            TransitionOutcome::Applied(job) => {
                tracing::debug!(job_id, status = %job.status, "job completed");
                Ok(job)
            }
            TransitionOutcome::Rejected(status) => Err(self.invalid(job_id, status, to)),
            TransitionOutcome::Missing => Err(job_not_found(job_id)),
        }
    }

    pub async fn job(&self, job_id: &str) -> Result<Option<Job>> {
        self.call(self.records.job(job_id)).await
    }

    /// Jobs addressed to an agent, newest first.
    pub async fn agent_jobs(&self, agent_id: &str) -> Result<Vec<Job>> {
        self.call(self.records.jobs_by_agent(agent_id)).await
    }

    /// Jobs submitted by a user, newest first.
    pub async fn user_jobs(&self, user_id: &str) -> Result<Vec<Job>> {
        self.call(self.records.jobs_by_user(user_id)).await
    }

    /// Jobs still `queuing` that were created before `created_before_ms`.
    pub async fn queuing_before(&self, created_before_ms: u64) -> Result<Vec<Job>> {
        self.call(self.records.jobs_in_status(JobStatus::Queuing, created_before_ms)).await
    }

    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        result: Option<String>,
    ) -> Result<TransitionOutcome> {
        let t = JobTransition { from, to, at_ms: epoch_ms(), result };
        self.call(self.records.transition_job(job_id, t)).await
    }

    async fn call<T>(&self, fut: StoreFuture<'_, T>) -> Result<T> {
        bounded(self.timeout, fut).await.map_err(|e| {
            self.failures.report("lifecycle", &e);
            RelayError::from(e)
        })
    }

    fn invalid(&self, job_id: &str, from: JobStatus, to: JobStatus) -> RelayError {
        let err = RelayError::invalid_transition(format!("job {job_id} cannot go {from} -> {to}"));
        self.failures.report("lifecycle", &err);
        err
    }
}

fn job_not_found(job_id: &str) -> RelayError {
    RelayError::not_found("JobNotFound", format!("job {job_id} not found"))
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
