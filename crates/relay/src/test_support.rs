// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: state builder, failing stores, and helpers.

use std::collections::HashSet;
use std::future::{pending, ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::failure::{Failure, FailureSink};
use crate::model::{Agent, AgentBasic, Job, JobInput, JobStatus, JobTransition, TransitionOutcome};
use crate::state::AppState;
use crate::store::{
    EphemeralStore, JsonRecords, MemoryEphemeral, RecordStore, StoreError, StoreFuture,
};

/// Builder for constructing `AppState` in tests with in-memory stores.
pub struct StateBuilder {
    records: Option<Arc<dyn RecordStore>>,
    ephemeral: Option<Arc<dyn EphemeralStore>>,
    auth_token: Option<String>,
    store_timeout: Duration,
    failure_capacity: usize,
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuilder {
    pub fn new() -> Self {
        Self {
            records: None,
            ephemeral: None,
            auth_token: None,
            store_timeout: Duration::from_millis(250),
            failure_capacity: 256,
        }
    }

    pub fn records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn ephemeral(mut self, ephemeral: Arc<dyn EphemeralStore>) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn failure_capacity(mut self, n: usize) -> Self {
        self.failure_capacity = n;
        self
    }

    /// Build state and return the failure receiver alongside it.
    pub fn build(self) -> (Arc<AppState>, mpsc::Receiver<Failure>) {
        let mut config = RelayConfig::parse_from(["relayd"]);
        config.auth_token = self.auth_token;
        config.store_timeout_ms = self.store_timeout.as_millis() as u64;
        config.failure_capacity = self.failure_capacity;

        let records = self.records.unwrap_or_else(|| Arc::new(JsonRecords::in_memory()));
        let ephemeral = self.ephemeral.unwrap_or_else(|| Arc::new(MemoryEphemeral::new()));
        let (failures, rx) = FailureSink::channel(self.failure_capacity);
        let state = AppState::new(config, records, ephemeral, failures);
        (Arc::new(state), rx)
    }
}

/// Create an agent named `name` for `owner`.
pub async fn add_agent(state: &AppState, owner: &str, name: &str) -> crate::error::Result<Agent> {
    state.registry.agent_add(owner, AgentBasic { name: name.to_owned(), ..Default::default() }).await
}

/// A submission addressed to `agent` with the default source.
pub fn job_input(agent: &str, message: &str) -> JobInput {
    JobInput { message: message.to_owned(), agent: agent.to_owned(), source: None }
}

/// Everything reported so far, without waiting.
pub fn drain_failures(rx: &mut mpsc::Receiver<Failure>) -> Vec<Failure> {
    let mut out = Vec::new();
    while let Ok(f) = rx.try_recv() {
        out.push(f);
    }
    out
}

/// Ephemeral store operations that [`FlakyEphemeral`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EphemeralOp {
    SetEx,
    Exists,
    PushBack,
    PopFront,
    Range,
    TakeExpired,
}

/// [`MemoryEphemeral`] with per-operation fault injection.
///
/// A failing op returns a backend error; a stalled store never completes, so
/// callers hit their deadline.
#[derive(Default)]
pub struct FlakyEphemeral {
    inner: MemoryEphemeral,
    failing: parking_lot::Mutex<HashSet<EphemeralOp>>,
    stalled: AtomicBool,
}

impl FlakyEphemeral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: EphemeralOp) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: EphemeralOp) {
        self.failing.lock().remove(&op);
    }

    pub fn stall(&self, on: bool) {
        self.stalled.store(on, Ordering::Relaxed);
    }

    pub fn inner(&self) -> &MemoryEphemeral {
        &self.inner
    }

    fn check<'a, T: Send + 'a>(&'a self, op: EphemeralOp) -> Option<StoreFuture<'a, T>> {
        if self.stalled.load(Ordering::Relaxed) {
            return Some(Box::pin(pending()));
        }
        if self.failing.lock().contains(&op) {
            return Some(Box::pin(ready(Err(StoreError::Backend(format!("injected {op:?} failure"))))));
        }
        None
    }
}

impl EphemeralStore for FlakyEphemeral {
    fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreFuture<'_, ()> {
        self.check(EphemeralOp::SetEx).unwrap_or_else(|| self.inner.set_ex(key, value, ttl))
    }

    fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
        self.check(EphemeralOp::Exists).unwrap_or_else(|| self.inner.exists(key))
    }

    fn push_back(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        self.check(EphemeralOp::PushBack).unwrap_or_else(|| self.inner.push_back(key, value))
    }

    fn pop_front(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        self.check(EphemeralOp::PopFront).unwrap_or_else(|| self.inner.pop_front(key))
    }

    fn range(&self, key: &str) -> StoreFuture<'_, Vec<Vec<u8>>> {
        self.check(EphemeralOp::Range).unwrap_or_else(|| self.inner.range(key))
    }

    fn take_expired(&self) -> StoreFuture<'_, Vec<String>> {
        self.check(EphemeralOp::TakeExpired).unwrap_or_else(|| self.inner.take_expired())
    }
}

/// [`JsonRecords`] whose reads and writes can be switched to fail.
pub struct FlakyRecords {
    inner: JsonRecords,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for FlakyRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyRecords {
    pub fn new() -> Self {
        Self {
            inner: JsonRecords::in_memory(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::Relaxed);
    }

    pub fn inner(&self) -> &JsonRecords {
        &self.inner
    }

    fn read<'a, T: Send + 'a>(&'a self, f: impl FnOnce() -> StoreFuture<'a, T>) -> StoreFuture<'a, T> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Box::pin(ready(Err(StoreError::Backend("injected read failure".to_owned()))));
        }
        f()
    }

    fn write<'a, T: Send + 'a>(&'a self, f: impl FnOnce() -> StoreFuture<'a, T>) -> StoreFuture<'a, T> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Box::pin(ready(Err(StoreError::Backend("injected write failure".to_owned()))));
        }
        f()
    }
}

impl RecordStore for FlakyRecords {
    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, bool> {
        self.write(|| self.inner.insert_agent(agent))
    }

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>> {
        self.read(|| self.inner.agent(id))
    }

    fn agents_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Agent>> {
        self.read(|| self.inner.agents_by_user(user_id))
    }

    fn agent_id_by_name(&self, user_id: &str, name: &str) -> StoreFuture<'_, Option<String>> {
        self.read(|| self.inner.agent_id_by_name(user_id, name))
    }

    fn agent_id_by_alias(&self, user_id: &str, alias: &str) -> StoreFuture<'_, Option<String>> {
        self.read(|| self.inner.agent_id_by_alias(user_id, alias))
    }

    fn agent_by_secret(&self, secret: &str) -> StoreFuture<'_, Option<Agent>> {
        self.read(|| self.inner.agent_by_secret(secret))
    }

    fn set_agent_secret(&self, id: &str, secret: &str) -> StoreFuture<'_, bool> {
        self.write(|| self.inner.set_agent_secret(id, secret))
    }

    fn set_agent_ip(&self, id: &str, ip: &str) -> StoreFuture<'_, ()> {
        self.write(|| self.inner.set_agent_ip(id, ip))
    }

    fn set_agent_activated(&self, id: &str, at_ms: u64) -> StoreFuture<'_, ()> {
        self.write(|| self.inner.set_agent_activated(id, at_ms))
    }

    fn delete_agent_cascade(&self, id: &str) -> StoreFuture<'_, bool> {
        self.write(|| self.inner.delete_agent_cascade(id))
    }

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()> {
        self.write(|| self.inner.insert_job(job))
    }

    fn job(&self, id: &str) -> StoreFuture<'_, Option<Job>> {
        self.read(|| self.inner.job(id))
    }

    fn transition_job(&self, id: &str, transition: JobTransition) -> StoreFuture<'_, TransitionOutcome> {
        self.write(|| self.inner.transition_job(id, transition))
    }

    fn jobs_by_agent(&self, agent_id: &str) -> StoreFuture<'_, Vec<Job>> {
        self.read(|| self.inner.jobs_by_agent(agent_id))
    }

    fn jobs_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Job>> {
        self.read(|| self.inner.jobs_by_user(user_id))
    }

    fn jobs_in_status(&self, status: JobStatus, created_before_ms: u64) -> StoreFuture<'_, Vec<Job>> {
        self.read(|| self.inner.jobs_in_status(status, created_before_ms))
    }
}

/// Convert foreign errors (e.g. `axum_test` setup errors) into `anyhow`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}
