// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent and job records, the queue wire form, and the job state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest accepted job message, in characters.
pub const MAX_MESSAGE_LEN: usize = 255;

/// Longest stored job result, in characters. Longer results are truncated.
pub const MAX_RESULT_LEN: usize = 1024;

/// Names that can never be used as an agent name or alias.
const RESERVED_NAMES: &[&str] = &[
    "admin", "agent", "agents", "all", "api", "help", "job", "jobs", "me", "root", "status",
    "system", "user",
];

/// Whether `name` collides with a reserved system name (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    let name = name.trim();
    RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a new opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// -- Agent --------------------------------------------------------------------

/// User-supplied fields for creating an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentBasic {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// A remote worker identity owned by a user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at_ms: Option<u64>,
    pub created_at_ms: u64,
}

impl Agent {
    /// Whether `key` matches this agent's name or alias.
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.alias.as_deref() == Some(key)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("remark", &self.remark)
            .field("secret", &"<redacted>")
            .field("ip", &self.ip)
            .field("activated_at_ms", &self.activated_at_ms)
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

// -- Job ----------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queuing,
    Sent,
    Expired,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queuing => "queuing",
            Self::Sent => "sent",
            Self::Expired => "expired",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queuing, Self::Sent)
                | (Self::Queuing, Self::Expired)
                | (Self::Sent, Self::Succeeded)
                | (Self::Sent, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a job was submitted from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    #[default]
    Api,
    Web,
    Wechat,
    Slack,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Web => "web",
            Self::Wechat => "wechat",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "web" => Ok(Self::Web),
            "wechat" => Ok(Self::Wechat),
            "slack" => Ok(Self::Slack),
            other => Err(format!("unknown job source: {other}")),
        }
    }
}

/// What an agent reports when it finishes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(String),
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded(_) => JobStatus::Succeeded,
            Self::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn into_result(self) -> String {
        match self {
            Self::Succeeded(r) | Self::Failed(r) => r,
        }
    }
}

/// Minimal projection of a job that travels through the agent queue.
///
/// Encoded with protobuf so the queue payload stays compact and independent
/// of the durable record layout.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct JobBasic {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Durable job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub message: String,
    pub user_id: String,
    pub agent_id: String,
    pub source: JobSource,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_at_ms: Option<u64>,
}

impl Job {
    /// A fresh job in `queuing`.
    pub fn new(user_id: &str, agent_id: &str, source: JobSource, message: &str) -> Self {
        Self {
            id: new_id(),
            message: message.to_owned(),
            user_id: user_id.to_owned(),
            agent_id: agent_id.to_owned(),
            source,
            status: JobStatus::Queuing,
            result: None,
            created_at_ms: epoch_ms(),
            sent_at_ms: None,
            expired_at_ms: None,
            succeeded_at_ms: None,
            failed_at_ms: None,
            callback_at_ms: None,
        }
    }

    pub fn basic(&self) -> JobBasic {
        JobBasic { id: self.id.clone(), message: self.message.clone() }
    }

    /// Apply a transition's status and timestamps. The caller has already
    /// checked that `self.status == t.from`.
    pub fn apply(&mut self, t: &JobTransition) {
        self.status = t.to;
        match t.to {
            JobStatus::Queuing => {}
            JobStatus::Sent => self.sent_at_ms = Some(t.at_ms),
            JobStatus::Expired => self.expired_at_ms = Some(t.at_ms),
            JobStatus::Succeeded => {
                self.succeeded_at_ms = Some(t.at_ms);
                self.callback_at_ms = Some(t.at_ms);
                self.result = t.result.clone();
            }
            JobStatus::Failed => {
                self.failed_at_ms = Some(t.at_ms);
                self.callback_at_ms = Some(t.at_ms);
                self.result = t.result.clone();
            }
        }
    }
}

/// A compare-and-set status change applied atomically by the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at_ms: u64,
    pub result: Option<String>,
}

/// Result of attempting a [`JobTransition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The job was in `from` and now holds the updated record.
    Applied(Job),
    /// The job exists but was in a different status.
    Rejected(JobStatus),
    /// No job with that id.
    Missing,
}

/// A job submission as received from a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub message: String,
    /// Agent name or alias.
    #[serde(default, alias = "agent_name", alias = "agent_alias")]
    pub agent: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Truncate `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
