// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS publisher for internal failures.
//!
//! Publishes each failure as JSON to `{prefix}.events.failure` so alerting can
//! react without scraping logs.

use tracing::{info, warn};

use crate::failure::Failure;

/// Connection settings for failure alerts.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub token: Option<String>,
    pub prefix: String,
}

/// Publishes failures to a NATS subject.
pub struct NatsAlerter {
    client: async_nats::Client,
    subject: String,
}

impl NatsAlerter {
    /// Connect to the NATS server and return an alerter.
    pub async fn connect(config: &NatsConfig) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }
        opts = opts.retry_on_initial_connect();

        info!(url = %config.url, prefix = %config.prefix, "connecting NATS failure alerter");
        let client = opts.connect(&config.url).await?;
        info!("NATS failure alerter connected");

        Ok(Self { client, subject: failure_subject(&config.prefix) })
    }

    /// Publish one failure. Errors are logged and swallowed.
    pub async fn publish(&self, failure: &Failure) {
        let json = match serde_json::to_vec(failure) {
            Ok(json) => json,
            Err(e) => {
                warn!("encode failure alert: {e}");
                return;
            }
        };
        if let Err(e) = self.client.publish(self.subject.clone(), json.into()).await {
            warn!("NATS publish failure alert failed: {e}");
        }
    }
}

/// Subject failures are published on.
pub fn failure_subject(prefix: &str) -> String {
    format!("{prefix}.events.failure")
}
