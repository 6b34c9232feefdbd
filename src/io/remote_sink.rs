//! Remote persistence sink - HTTP delivery of journey records
//!
//! Mirrors the record store for a remote backend: each completed journey is
//! POSTed as JSON to a configured endpoint, scoped to the configured user
//! via header and bearer token. Delivery is fire-and-forget from the
//! engine's point of view: a worker owns the channel, failures are logged
//! and dropped (retrying is the backend's responsibility), and the engine's
//! committed state is never affected.

use crate::domain::journey::JourneyRecord;
use crate::infra::config::Config;
use anyhow::Context;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// HTTP sink for journey records
pub struct RemoteSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    user: String,
}

impl RemoteSink {
    /// Build a sink from config. Returns None when no remote URL is set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.remote_url()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.remote_timeout_ms()))
            .build()
            .ok()?;

        info!(url = %url, "remote_sink_initialized");
        Some(Self {
            client,
            url,
            token: config.remote_token().map(str::to_string),
            user: config.user_id().to_string(),
        })
    }

    /// Deliver one record to the remote endpoint.
    pub async fn deliver(&self, record: &JourneyRecord) -> anyhow::Result<()> {
        let mut request =
            self.client.post(self.url.as_str()).header("x-user-id", &self.user).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("send journey record")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("remote sink returned {status}");
        }
        Ok(())
    }
}

/// Worker loop: drains the record channel and delivers each record once.
pub async fn run_remote_sink(
    sink: RemoteSink,
    mut record_rx: mpsc::Receiver<JourneyRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("remote_sink_shutdown");
                    return;
                }
            }
            record = record_rx.recv() => {
                match record {
                    Some(record) => {
                        let id = record.id.clone();
                        match sink.deliver(&record).await {
                            Ok(()) => info!(id = %id, "record_synced"),
                            // No retry here - the backend owns durability
                            Err(e) => error!(id = %id, error = %e, "record_sync_failed"),
                        }
                    }
                    None => {
                        info!("record_channel_closed");
                        return;
                    }
                }
            }
        }
    }
}
