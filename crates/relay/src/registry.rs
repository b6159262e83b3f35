// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent records owned by users: creation, lookup, secrets, and deletion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{RelayError, Result};
use crate::failure::FailureSink;
use crate::model::{epoch_ms, is_reserved, new_id, Agent, AgentBasic};
use crate::presence::PresenceTracker;
use crate::store::{bounded, RecordStore, StoreFuture};

const SECRET_BYTES: usize = 20;

/// Secret -> agent id, filled on successful authentication.
///
/// `generation` bumps on every eviction so a lookup that raced with a secret
/// rotation cannot re-insert the stale secret.
#[derive(Default)]
struct CredentialCache {
    entries: HashMap<String, String>,
    generation: u64,
}

pub struct AgentRegistry {
    records: Arc<dyn RecordStore>,
    presence: Arc<PresenceTracker>,
    failures: FailureSink,
    timeout: Duration,
    rng: SystemRandom,
    credentials: RwLock<CredentialCache>,
}

impl AgentRegistry {
    pub fn new(
        records: Arc<dyn RecordStore>,
        presence: Arc<PresenceTracker>,
        failures: FailureSink,
        timeout: Duration,
    ) -> Self {
        Self {
            records,
            presence,
            failures,
            timeout,
            rng: SystemRandom::new(),
            credentials: RwLock::new(CredentialCache::default()),
        }
    }

    /// Create an agent for `owner` with a fresh secret.
    pub async fn agent_add(&self, owner: &str, basic: AgentBasic) -> Result<Agent> {
        let name = basic.name.trim();
        if name.is_empty() {
            return Err(RelayError::invalid_input("MissingName", "agent name is required"));
        }
        if is_reserved(name) {
            return Err(RelayError::invalid_input("InvalidName", format!("agent name {name:?} is reserved")));
        }
        let alias = basic.alias.as_deref().map(str::trim).filter(|a| !a.is_empty());
        if let Some(alias) = alias {
            if is_reserved(alias) {
                return Err(RelayError::invalid_input(
                    "InvalidAlias",
                    format!("agent alias {alias:?} is reserved"),
                ));
            }
        }

        let now = epoch_ms();
        let agent = Agent {
            id: new_id(),
            user_id: owner.to_owned(),
            name: name.to_owned(),
            alias: alias.map(str::to_owned),
            remark: basic.remark.filter(|r| !r.trim().is_empty()),
            secret: self.generate_secret()?,
            ip: None,
            activated_at_ms: None,
            created_at_ms: now,
        };
        if !self.call(self.records.insert_agent(agent.clone())).await? {
            return Err(RelayError::conflict(
                "NameTaken",
                format!("agent name or alias already in use: {name}"),
            ));
        }
        tracing::info!(agent_id = %agent.id, user_id = owner, name = %agent.name, "agent created");
        Ok(agent)
    }

    /// Every agent owned by `owner`.
    pub async fn user_agents(&self, owner: &str) -> Result<Vec<Agent>> {
        self.call(self.records.agents_by_user(owner)).await
    }

    /// Resolve a name or alias among `owner`'s agents. Names win over aliases.
    pub async fn find_agent_id_by_name(&self, owner: &str, key: &str) -> Result<Option<String>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.call(self.records.agent_id_by_name(owner, key)).await? {
            return Ok(Some(id));
        }
        self.call(self.records.agent_id_by_alias(owner, key)).await
    }

    pub async fn agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.call(self.records.agent(agent_id)).await
    }

    /// The agent if it exists and belongs to `owner`. Someone else's agent
    /// is indistinguishable from a missing one.
    pub async fn owned_agent(&self, owner: &str, agent_id: &str) -> Result<Agent> {
        match self.agent(agent_id).await? {
            Some(agent) if agent.user_id == owner => Ok(agent),
            _ => Err(agent_not_found(agent_id)),
        }
    }

    pub async fn agent_secret(&self, agent_id: &str) -> Result<String> {
        self.agent(agent_id).await?.map(|a| a.secret).ok_or_else(|| agent_not_found(agent_id))
    }

    /// Replace the agent's secret. The previous secret stops authenticating
    /// immediately.
    pub async fn agent_secret_reset(&self, agent_id: &str) -> Result<String> {
        let secret = self.generate_secret()?;
        if !self.call(self.records.set_agent_secret(agent_id, &secret)).await? {
            return Err(agent_not_found(agent_id));
        }
        self.evict(agent_id);
        tracing::info!(agent_id, "agent secret rotated");
        Ok(secret)
    }

    /// Delete an offline agent and all of its jobs.
    pub async fn agent_delete(&self, agent_id: &str) -> Result<()> {
        if self.presence.is_online(agent_id).await {
            return Err(RelayError::conflict(
                "AgentOnline",
                format!("agent {agent_id} is online; stop it before deleting"),
            ));
        }
        if !self.call(self.records.delete_agent_cascade(agent_id)).await? {
            return Err(agent_not_found(agent_id));
        }
        self.evict(agent_id);
        tracing::info!(agent_id, "agent deleted");
        Ok(())
    }

    /// Resolve an agent secret to its agent id.
    pub async fn authenticate(&self, secret: &str) -> Result<String> {
        if secret.is_empty() {
            return Err(RelayError::unauthorized("missing agent secret"));
        }
        let generation = {
            let cache = self.credentials.read();
            if let Some(id) = cache.entries.get(secret) {
                return Ok(id.clone());
            }
            cache.generation
        };

        let Some(agent) = self.call(self.records.agent_by_secret(secret)).await? else {
            return Err(RelayError::unauthorized("unknown agent secret"));
        };
        let mut cache = self.credentials.write();
        if cache.generation == generation {
            cache.entries.insert(secret.to_owned(), agent.id.clone());
        }
        Ok(agent.id)
    }

    fn evict(&self, agent_id: &str) {
        let mut cache = self.credentials.write();
        cache.entries.retain(|_, id| id != agent_id);
        cache.generation += 1;
    }

    fn generate_secret(&self) -> Result<String> {
        let mut buf = [0u8; SECRET_BYTES];
        self.rng
            .fill(&mut buf)
            .map_err(|_| RelayError::infrastructure("system random source unavailable"))?;
        Ok(buf.iter().map(|b| format!("{b:02x}")).collect())
    }

    async fn call<T>(&self, fut: StoreFuture<'_, T>) -> Result<T> {
        bounded(self.timeout, fut).await.map_err(|e| {
            self.failures.report("registry", &e);
            RelayError::from(e)
        })
    }
}

fn agent_not_found(agent_id: &str) -> RelayError {
    RelayError::not_found("AgentNotFound", format!("agent {agent_id} not found"))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
