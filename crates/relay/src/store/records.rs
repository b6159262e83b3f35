// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable record store: an in-memory index plus an optional append-only
//! journal of record upserts.
//!
//! Every mutation appends only the records it touched, one JSON line each.
//! Opening a journal replays it and rewrites it compacted (one line per live
//! record); the running store also compacts once dead lines outnumber live
//! records by [`COMPACT_RATIO`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{RecordStore, StoreError, StoreFuture};
use crate::model::{Agent, Job, JobStatus, JobTransition, TransitionOutcome};

/// Journal lines allowed per live record before the running store compacts.
pub const COMPACT_RATIO: usize = 4;

/// Journal lines tolerated regardless of the live record count.
const COMPACT_SLACK: usize = 1024;

/// Everything the record store holds. Jobs keep insertion (creation) order.
#[derive(Debug, Default, Clone)]
pub struct RecordSnapshot {
    pub agents: IndexMap<String, Agent>,
    pub jobs: IndexMap<String, Job>,
}

impl RecordSnapshot {
    fn apply(&mut self, op: RecordOp) {
        match op {
            RecordOp::PutAgent { agent } => {
                self.agents.insert(agent.id.clone(), agent);
            }
            RecordOp::DropAgent { id } => {
                self.agents.shift_remove(&id);
                self.jobs.retain(|_, job| job.agent_id != id);
            }
            RecordOp::PutJob { job } => {
                self.jobs.insert(job.id.clone(), job);
            }
        }
    }

    fn live(&self) -> usize {
        self.agents.len() + self.jobs.len()
    }
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordOp {
    PutAgent { agent: Agent },
    /// Removes the agent and every job addressed to it.
    DropAgent { id: String },
    PutJob { job: Job },
}

/// Append handle on the journal file. Created lazily on the first write.
struct Journal {
    path: PathBuf,
    file: Option<File>,
    len: u64,
    lines: usize,
}

impl Journal {
    fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf(), file: None, len: 0, lines: 0 }
    }

    /// Replay an existing journal. A torn final line (crash mid-append) is
    /// dropped; corruption anywhere else is an error.
    fn replay(path: &Path) -> anyhow::Result<RecordSnapshot> {
        let lines = BufReader::new(File::open(path)?).lines().collect::<Result<Vec<_>, _>>()?;
        let mut snapshot = RecordSnapshot::default();
        let last = lines.len().saturating_sub(1);
        for (n, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordOp>(line) {
                Ok(op) => snapshot.apply(op),
                Err(e) if n == last => {
                    tracing::warn!(path = %path.display(), err = %e, "dropping torn journal tail");
                }
                Err(e) => anyhow::bail!("{}:{}: {e}", path.display(), n + 1),
            }
        }
        Ok(snapshot)
    }

    /// Replace the journal with one line per live record.
    fn compact(&mut self, snapshot: &RecordSnapshot) -> anyhow::Result<()> {
        let mut buf = String::new();
        for agent in snapshot.agents.values() {
            push_line(&mut buf, &RecordOp::PutAgent { agent: agent.clone() })?;
        }
        for job in snapshot.jobs.values() {
            push_line(&mut buf, &RecordOp::PutJob { job: job.clone() })?;
        }

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".compact");
        let tmp_path = self.path.with_file_name(tmp_name);
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(buf.as_bytes())?;
        tmp.sync_all()?;
        // The old handle points at the replaced inode; the next append reopens.
        self.file = None;
        std::fs::rename(&tmp_path, &self.path)?;
        self.len = buf.len() as u64;
        self.lines = snapshot.live();
        Ok(())
    }

    fn append(&mut self, ops: &[RecordOp]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for op in ops {
            push_line(&mut buf, op)?;
        }
        let file = match self.file.take() {
            Some(file) => file,
            None => OpenOptions::new().create(true).append(true).open(&self.path)?,
        };
        let file = self.file.insert(file);
        if let Err(e) = file.write_all(buf.as_bytes()) {
            // Cut a partial line so the next append starts clean.
            let _ = file.set_len(self.len);
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        self.lines += ops.len();
        Ok(())
    }

    fn wants_compaction(&self, live: usize) -> bool {
        self.lines > live.saturating_mul(COMPACT_RATIO) + COMPACT_SLACK
    }
}

fn push_line(buf: &mut String, op: &RecordOp) -> serde_json::Result<()> {
    buf.push_str(&serde_json::to_string(op)?);
    buf.push('\n');
    Ok(())
}

struct Shared {
    state: RwLock<RecordSnapshot>,
    /// Serializes writers; `None` for an in-memory store.
    journal: Mutex<Option<Journal>>,
    persistent: bool,
}

impl Shared {
    /// Decide a mutation against current state, persist its ops, then publish
    /// them. A failed append leaves memory unchanged.
    fn commit<T>(
        &self,
        decide: impl FnOnce(&RecordSnapshot) -> (T, Vec<RecordOp>),
    ) -> Result<T, StoreError> {
        let mut journal = self.journal.lock();
        let (out, ops) = decide(&*self.state.read());
        if ops.is_empty() {
            return Ok(out);
        }
        if let Some(ref mut journal) = *journal {
            journal
                .append(&ops)
                .map_err(|e| StoreError::Backend(format!("append record journal: {e:#}")))?;
        }
        {
            let mut state = self.state.write();
            for op in ops {
                state.apply(op);
            }
        }

        if let Some(ref mut journal) = *journal {
            let state = self.state.read();
            if journal.wants_compaction(state.live()) {
                match journal.compact(&state) {
                    Ok(()) => tracing::debug!(records = state.live(), "record journal compacted"),
                    Err(e) => tracing::warn!(err = %e, "record journal compaction failed"),
                }
            }
        }
        Ok(out)
    }
}

/// [`RecordStore`] over a [`RecordSnapshot`].
///
/// Work happens when the returned future is polled, so callers' deadlines
/// apply. Journal writes run on the blocking pool and finish even if the
/// caller gives up, keeping memory and disk in step.
#[derive(Clone)]
pub struct JsonRecords {
    shared: Arc<Shared>,
}

impl JsonRecords {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with(RecordSnapshot::default(), None)
    }

    /// Open (or create on first write) a journal file.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut journal = Journal::new(path);
        let snapshot = if path.exists() {
            let snapshot = Journal::replay(path)?;
            journal.compact(&snapshot)?;
            snapshot
        } else {
            RecordSnapshot::default()
        };
        tracing::info!(
            path = %path.display(),
            agents = snapshot.agents.len(),
            jobs = snapshot.jobs.len(),
            "record store opened"
        );
        Ok(Self::with(snapshot, Some(journal)))
    }

    fn with(snapshot: RecordSnapshot, journal: Option<Journal>) -> Self {
        let persistent = journal.is_some();
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(snapshot),
                journal: Mutex::new(journal),
                persistent,
            }),
        }
    }

    /// Lines currently in the journal file (0 for an in-memory store).
    pub fn journal_lines(&self) -> usize {
        self.shared.journal.lock().as_ref().map_or(0, |j| j.lines)
    }

    fn query<T: Send + 'static>(
        &self,
        f: impl FnOnce(&RecordSnapshot) -> T + Send + 'static,
    ) -> StoreFuture<'_, T> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { Ok(f(&*shared.state.read())) })
    }

    fn write<T: Send + 'static>(
        &self,
        decide: impl FnOnce(&RecordSnapshot) -> (T, Vec<RecordOp>) + Send + 'static,
    ) -> StoreFuture<'_, T> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            if !shared.persistent {
                return shared.commit(decide);
            }
            tokio::task::spawn_blocking(move || shared.commit(decide))
                .await
                .map_err(|e| StoreError::Backend(format!("record writer failed: {e}")))?
        })
    }

    /// Upsert one agent built from the stored copy; no-op when it is unknown.
    fn update_agent(
        &self,
        id: &str,
        edit: impl FnOnce(&mut Agent) + Send + 'static,
    ) -> StoreFuture<'_, bool> {
        let id = id.to_owned();
        self.write(move |s| match s.agents.get(&id) {
            Some(agent) => {
                let mut agent = agent.clone();
                edit(&mut agent);
                (true, vec![RecordOp::PutAgent { agent }])
            }
            None => (false, Vec::new()),
        })
    }
}

impl RecordStore for JsonRecords {
    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, bool> {
        self.write(move |s| {
            let taken = s.agents.values().filter(|a| a.user_id == agent.user_id).any(|a| {
                a.answers_to(&agent.name) || agent.alias.as_deref().is_some_and(|x| a.answers_to(x))
            });
            if taken {
                return (false, Vec::new());
            }
            (true, vec![RecordOp::PutAgent { agent }])
        })
    }

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>> {
        let id = id.to_owned();
        self.query(move |s| s.agents.get(&id).cloned())
    }

    fn agents_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Agent>> {
        let user_id = user_id.to_owned();
        self.query(move |s| s.agents.values().filter(|a| a.user_id == user_id).cloned().collect())
    }

    fn agent_id_by_name(&self, user_id: &str, name: &str) -> StoreFuture<'_, Option<String>> {
        let (user_id, name) = (user_id.to_owned(), name.to_owned());
        self.query(move |s| {
            s.agents.values().find(|a| a.user_id == user_id && a.name == name).map(|a| a.id.clone())
        })
    }

    fn agent_id_by_alias(&self, user_id: &str, alias: &str) -> StoreFuture<'_, Option<String>> {
        let (user_id, alias) = (user_id.to_owned(), alias.to_owned());
        self.query(move |s| {
            s.agents
                .values()
                .find(|a| a.user_id == user_id && a.alias.as_deref() == Some(alias.as_str()))
                .map(|a| a.id.clone())
        })
    }

    fn agent_by_secret(&self, secret: &str) -> StoreFuture<'_, Option<Agent>> {
        let secret = secret.to_owned();
        self.query(move |s| s.agents.values().find(|a| a.secret == secret).cloned())
    }

    fn set_agent_secret(&self, id: &str, secret: &str) -> StoreFuture<'_, bool> {
        let secret = secret.to_owned();
        self.update_agent(id, move |a| a.secret = secret)
    }

    fn set_agent_ip(&self, id: &str, ip: &str) -> StoreFuture<'_, ()> {
        let ip = ip.to_owned();
        let fut = self.update_agent(id, move |a| a.ip = Some(ip));
        Box::pin(async move { fut.await.map(|_| ()) })
    }

    fn set_agent_activated(&self, id: &str, at_ms: u64) -> StoreFuture<'_, ()> {
        let fut = self.update_agent(id, move |a| a.activated_at_ms = Some(at_ms));
        Box::pin(async move { fut.await.map(|_| ()) })
    }

    fn delete_agent_cascade(&self, id: &str) -> StoreFuture<'_, bool> {
        let id = id.to_owned();
        self.write(move |s| {
            if !s.agents.contains_key(&id) {
                return (false, Vec::new());
            }
            (true, vec![RecordOp::DropAgent { id }])
        })
    }

    fn insert_job(&self, job: Job) -> StoreFuture<'_, ()> {
        self.write(move |_| ((), vec![RecordOp::PutJob { job }]))
    }

    fn job(&self, id: &str) -> StoreFuture<'_, Option<Job>> {
        let id = id.to_owned();
        self.query(move |s| s.jobs.get(&id).cloned())
    }

    fn transition_job(
        &self,
        id: &str,
        transition: JobTransition,
    ) -> StoreFuture<'_, TransitionOutcome> {
        let id = id.to_owned();
        self.write(move |s| match s.jobs.get(&id) {
            None => (TransitionOutcome::Missing, Vec::new()),
            Some(job) if job.status != transition.from => {
                (TransitionOutcome::Rejected(job.status), Vec::new())
            }
            Some(job) => {
                let mut job = job.clone();
                job.apply(&transition);
                (TransitionOutcome::Applied(job.clone()), vec![RecordOp::PutJob { job }])
            }
        })
    }

    fn jobs_by_agent(&self, agent_id: &str) -> StoreFuture<'_, Vec<Job>> {
        let agent_id = agent_id.to_owned();
        self.query(move |s| s.jobs.values().rev().filter(|j| j.agent_id == agent_id).cloned().collect())
    }

    fn jobs_by_user(&self, user_id: &str) -> StoreFuture<'_, Vec<Job>> {
        let user_id = user_id.to_owned();
        self.query(move |s| s.jobs.values().rev().filter(|j| j.user_id == user_id).cloned().collect())
    }

    fn jobs_in_status(
        &self,
        status: JobStatus,
        created_before_ms: u64,
    ) -> StoreFuture<'_, Vec<Job>> {
        self.query(move |s| {
            s.jobs
                .values()
                .filter(|j| j.status == status && j.created_at_ms < created_before_ms)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
