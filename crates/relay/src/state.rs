// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::failure::FailureSink;
use crate::lifecycle::JobLifecycle;
use crate::presence::PresenceTracker;
use crate::queue::JobQueue;
use crate::reconcile::Reconciler;
use crate::registry::AgentRegistry;
use crate::store::{EphemeralStore, RecordStore};

/// Shared service state. Every component holds its store handles directly;
/// this struct only wires them together.
pub struct AppState {
    pub config: RelayConfig,
    pub lifecycle: Arc<JobLifecycle>,
    pub queue: Arc<JobQueue>,
    pub presence: Arc<PresenceTracker>,
    pub registry: Arc<AgentRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        records: Arc<dyn RecordStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        failures: FailureSink,
    ) -> Self {
        let timeout = config.store_timeout();
        let lifecycle = Arc::new(JobLifecycle::new(Arc::clone(&records), failures.clone(), timeout));
        let queue = Arc::new(JobQueue::new(Arc::clone(&ephemeral), failures.clone(), timeout));
        let presence = Arc::new(PresenceTracker::new(
            ephemeral,
            Arc::clone(&records),
            Arc::clone(&queue),
            Arc::clone(&lifecycle),
            failures.clone(),
            timeout,
        ));
        let registry = Arc::new(AgentRegistry::new(records, Arc::clone(&presence), failures, timeout));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&presence),
            Arc::clone(&queue),
            Arc::clone(&lifecycle),
        ));
        let reconciler =
            Arc::new(Reconciler::new(Arc::clone(&lifecycle), Arc::clone(&queue), config.stuck_after()));

        Self { config, lifecycle, queue, presence, registry, dispatcher, reconciler }
    }
}
