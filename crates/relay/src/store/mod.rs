// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage seams: a durable record store and an ephemeral key/value store.
//!
//! The two stores fail independently and share no transaction. Both traits are
//! object-safe so components hold them as `Arc<dyn ...>` and tests can swap in
//! failing implementations.

pub mod ephemeral;
pub mod records;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::model::{Agent, Job, JobStatus, JobTransition, TransitionOutcome};

pub use ephemeral::MemoryEphemeral;
pub use records::JsonRecords;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// An infrastructure failure in either store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not finish within its deadline.
    Timeout(Duration),
    /// The backend refused or failed the operation.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(d) => write!(f, "store call timed out after {}ms", d.as_millis()),
            Self::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Run a store call under a deadline. A timeout is an infrastructure failure.
pub async fn bounded<T>(timeout: Duration, fut: StoreFuture<'_, T>) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// Durable agent and job records.
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a new agent. Returns `false` (and stores nothing) when the name or
    /// alias collides with another agent's name or alias for the same user.
    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, bool>;

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>>;

    fn agents_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Agent>>;

    fn agent_id_by_name(&self, user_id: &str, name: &str) -> StoreFuture<'_, Option<String>>;

    fn agent_id_by_alias(&self, user_id: &str, alias: &str) -> StoreFuture<'_, Option<String>>;

    fn agent_by_secret(&self, secret: &str) -> StoreFuture<'_, Option<Agent>>;

    /// Replace the agent's secret. Returns `false` when the agent is unknown.
    fn set_agent_secret(&self, id: &str, secret: &str) -> StoreFuture<'_, bool>;

    fn set_agent_ip(&self, id: &str, ip: &str) -> StoreFuture<'_, ()>;

    fn set_agent_activated(&self, id: &str, at_ms: u64) -> StoreFuture<'_, ()>;

    /// Delete the agent and every job addressed to it as one unit.
    /// Returns `false` when the agent is unknown.
    fn delete_agent_cascade(&self, id: &str) -> StoreFuture<'_, bool>;

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()>;

    fn job(&self, id: &str) -> StoreFuture<'_, Option<Job>>;

    /// Apply `transition` only if the job is currently in `transition.from`.
    fn transition_job(
        &self,
        id: &str,
        transition: JobTransition,
    ) -> StoreFuture<'_, TransitionOutcome>;

    /// Jobs addressed to an agent, newest first.
    fn jobs_by_agent(&self, agent_id: &str) -> StoreFuture<'_, Vec<Job>>;

    /// Jobs submitted by a user, newest first.
    fn jobs_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Job>>;

    /// Jobs in `status` created strictly before `created_before_ms`, oldest first.
    fn jobs_in_status(
        &self,
        status: JobStatus,
        created_before_ms: u64,
    ) -> StoreFuture<'_, Vec<Job>>;
}

/// Ephemeral key/value store with expiring keys and ordered lists.
///
/// Modelled on a Redis-style server: string keys with optional TTL, lists with
/// push-to-tail / pop-from-head, and a feed of keys that lapsed.
pub trait EphemeralStore: Send + Sync + 'static {
    /// Set `key` to `value`, replacing any previous value and TTL.
    fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'_, ()>;

    fn exists(&self, key: &str) -> StoreFuture<'_, bool>;

    /// Append to the tail of the list at `key`.
    fn push_back(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()>;

    /// Remove and return the head of the list at `key`.
    fn pop_front(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>>;

    /// Snapshot of the list at `key`, head first.
    fn range(&self, key: &str) -> StoreFuture<'_, Vec<Vec<u8>>>;

    /// Drain the keys whose TTL lapsed since the last call.
    fn take_expired(&self) -> StoreFuture<'_, Vec<String>>;
}
