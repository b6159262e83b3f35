// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay: job dispatch and agent presence service.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod failure;
pub mod lifecycle;
pub mod model;
pub mod presence;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod store;
pub mod test_support;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::failure::nats::NatsAlerter;
use crate::failure::{spawn_reporter, FailureSink};
use crate::presence::spawn_offline_watcher;
use crate::reconcile::spawn_reconciler;
use crate::state::AppState;
use crate::store::{EphemeralStore, JsonRecords, MemoryEphemeral, RecordStore};
use crate::transport::build_router;

/// Run the relay server until SIGINT/SIGTERM.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let records: Arc<dyn RecordStore> = match config.state_file {
        Some(ref path) => Arc::new(JsonRecords::open(path)?),
        None => Arc::new(JsonRecords::in_memory()),
    };
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryEphemeral::new());

    let alerter = match config.nats() {
        Some(ref nats) => Some(NatsAlerter::connect(nats).await?),
        None => None,
    };
    let (failures, failure_rx) = FailureSink::channel(config.failure_capacity);
    let reporter = spawn_reporter(failure_rx, alerter, shutdown.clone());

    let state = Arc::new(AppState::new(config.clone(), records, ephemeral, failures));
    let watcher =
        spawn_offline_watcher(Arc::clone(&state.presence), config.watch_interval(), shutdown.clone());
    let reconciler = spawn_reconciler(
        Arc::clone(&state.reconciler),
        config.reconcile_interval(),
        shutdown.clone(),
    );

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("relay listening on {}", listener.local_addr()?);

    tokio::spawn(wait_for_signal(shutdown.clone()));
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(watcher, reconciler, reporter);
    tracing::info!("relay stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                    _ = shutdown.cancelled() => return,
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "SIGTERM handler unavailable");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
    #[cfg(not(unix))]
    tokio::select! {
        _ = ctrl_c => {}
        _ = shutdown.cancelled() => return,
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
