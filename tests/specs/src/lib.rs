// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `relayd` binary as a subprocess and drives it over HTTP.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `relayd` binary.
pub fn relayd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("relayd")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `relayd` process that is killed on drop.
pub struct RelayProcess {
    child: Child,
    port: u16,
}

/// Builder for the flags a [`RelayProcess`] starts with.
#[derive(Default)]
pub struct RelayBuilder {
    auth_token: Option<String>,
    state_file: Option<PathBuf>,
    watch_ms: Option<u64>,
}

impl RelayBuilder {
    /// Require `token` as the service bearer on user routes.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Persist records to `path` instead of keeping them in memory.
    pub fn state_file(mut self, path: &Path) -> Self {
        self.state_file = Some(path.to_owned());
        self
    }

    /// Override the offline watcher interval.
    pub fn watch_ms(mut self, ms: u64) -> Self {
        self.watch_ms = Some(ms);
        self
    }

    pub fn spawn(self) -> anyhow::Result<RelayProcess> {
        ensure_crypto();
        let binary = relayd_binary();
        anyhow::ensure!(binary.exists(), "relayd binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }
        if let Some(ms) = self.watch_ms {
            args.extend(["--watch-ms".into(), ms.to_string()]);
        }
        if let Some(ref path) = self.state_file {
            args.extend(["--state-file".into(), path.to_string_lossy().into_owned()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("RELAY_NATS_URL")
            .env_remove("RUST_LOG")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(RelayProcess { child, port })
    }
}

impl RelayProcess {
    pub fn build() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Spawn relayd with in-memory records and no service token.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for API requests.
    pub fn api_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1", self.port)
    }

    /// Poll `/status` until it answers.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/status", self.api_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("relayd did not become ready within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("relayd did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
