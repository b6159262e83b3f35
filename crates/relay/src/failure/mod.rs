// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fire-and-forget reporting of internal failures.
//!
//! Components call [`FailureSink::report`] on infrastructure errors. The call
//! never blocks: failures go onto a bounded channel drained by a dedicated
//! reporter task that logs them and optionally publishes them to NATS. When
//! the channel is full the failure is counted and dropped.

pub mod nats;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::failure::nats::NatsAlerter;
use crate::model::epoch_ms;

/// One reported failure.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    /// Component that hit the failure (`presence`, `queue`, ...).
    pub source: &'static str,
    pub error: String,
    pub at_ms: u64,
}

/// Cheap-to-clone handle for reporting failures.
#[derive(Clone)]
pub struct FailureSink {
    tx: mpsc::Sender<Failure>,
    dropped: Arc<AtomicU64>,
}

impl FailureSink {
    /// Create a sink and the receiver its reporter drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Failure>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    /// Queue a failure for the reporter. Never blocks and never fails.
    pub fn report(&self, source: &'static str, err: impl fmt::Display) {
        let failure = Failure { source, error: err.to_string(), at_ms: epoch_ms() };
        if let Err(e) = self.tx.try_send(failure) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let failure = match e {
                mpsc::error::TrySendError::Full(f) | mpsc::error::TrySendError::Closed(f) => f,
            };
            tracing::debug!(
                source = failure.source,
                err = %failure.error,
                dropped = total,
                "failure sink unavailable, dropping report"
            );
        }
    }

    /// Number of failures dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the reporter loop that drains `rx` until shutdown or until every
/// sink handle is dropped. Failures already queued at shutdown are still
/// reported. The task yields the number of failures it handled.
pub fn spawn_reporter(
    mut rx: mpsc::Receiver<Failure>,
    alerter: Option<NatsAlerter>,
    shutdown: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut handled = 0;
        loop {
            let failure = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(f) => f,
                    None => break,
                },
            };
            emit(&failure, alerter.as_ref()).await;
            handled += 1;
        }

        rx.close();
        while let Ok(failure) = rx.try_recv() {
            emit(&failure, alerter.as_ref()).await;
            handled += 1;
        }
        tracing::debug!(handled, "failure reporter shutting down");
        handled
    })
}

async fn emit(failure: &Failure, alerter: Option<&NatsAlerter>) {
    tracing::error!(source = failure.source, err = %failure.error, "internal failure");
    if let Some(alerter) = alerter {
        alerter.publish(failure).await;
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
