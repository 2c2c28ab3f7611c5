use super::{Inventory, RecordingDescriptor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use reqwest::Client;
use std::time::Duration;
use tapedeck_common::time::as_secs_f64;

const LIST_PATH: &str = "/api/v1/recording/list-without-concatenation";

/// Client for an external recording inventory service.
pub struct HttpInventory {
    client: Client,
    base_url: String,
}

impl HttpInventory {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Inventory for HttpInventory {
    async fn find_segments(
        &self,
        stream: &str,
        start: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Result<Vec<RecordingDescriptor>> {
        let url = format!("{}{}", self.base_url, LIST_PATH);
        let start = start.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        let duration = as_secs_f64(duration).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("device", stream),
                ("start", start.as_str()),
                ("duration", duration.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Inventory returned {}: {}", status, body);
        }

        let recordings: Vec<RecordingDescriptor> = response
            .json()
            .await
            .context("Failed to decode inventory response")?;

        tracing::debug!(stream, count = recordings.len(), "inventory listed recordings");
        Ok(recordings)
    }
}
