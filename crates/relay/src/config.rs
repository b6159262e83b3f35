// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::failure::nats::NatsConfig;

/// Job dispatch and agent presence service.
#[derive(Debug, Clone, Parser)]
#[command(name = "relayd", version, about)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9900, env = "RELAY_PORT")]
    pub port: u16,

    /// Bearer token required on user routes. If unset, only `X-User-Id` is checked.
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// JSON snapshot file for agent and job records. In-memory when unset.
    #[arg(long, env = "RELAY_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// How often the offline watcher checks for lapsed presence markers (ms).
    #[arg(long, default_value_t = 1000, env = "RELAY_WATCH_MS")]
    pub watch_ms: u64,

    /// How often the reconciler sweeps for orphaned queuing jobs (ms).
    #[arg(long, default_value_t = 60_000, env = "RELAY_RECONCILE_MS")]
    pub reconcile_ms: u64,

    /// Age after which a queuing job missing from its queue is expired (seconds).
    #[arg(long, default_value_t = 600, env = "RELAY_STUCK_AFTER_SECS")]
    pub stuck_after_secs: u64,

    /// Deadline for each store call (ms).
    #[arg(long, default_value_t = 2000, env = "RELAY_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: u64,

    /// Capacity of the failure report channel.
    #[arg(long, default_value_t = 1024, env = "RELAY_FAILURE_CAPACITY")]
    pub failure_capacity: usize,

    /// NATS server URL for failure alerts. Alerts are off when unset.
    #[arg(long, env = "RELAY_NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS auth token.
    #[arg(long, env = "RELAY_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// Subject prefix for NATS alerts.
    #[arg(long, default_value = "relay", env = "RELAY_NATS_PREFIX")]
    pub nats_prefix: String,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "RELAY_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watch_ms == 0 {
            anyhow::bail!("--watch-ms must be greater than zero");
        }
        if self.reconcile_ms == 0 {
            anyhow::bail!("--reconcile-ms must be greater than zero");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("--store-timeout-ms must be greater than zero");
        }
        // A job waiting out a full presence window is not stuck.
        if self.stuck_after() <= crate::presence::PRESENCE_TTL {
            anyhow::bail!(
                "--stuck-after-secs must exceed the presence window ({}s)",
                crate::presence::PRESENCE_TTL.as_secs()
            );
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_ms)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// NATS alert settings, when a URL is configured.
    pub fn nats(&self) -> Option<NatsConfig> {
        self.nats_url.as_ref().map(|url| NatsConfig {
            url: url.clone(),
            token: self.nats_token.clone(),
            prefix: self.nats_prefix.clone(),
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
