//! Recording inventory: which segments cover a time window.
//!
//! Two sources are available. [`HttpInventory`] asks an external recording
//! service; [`DiskInventory`] scans the record directories and decodes segment
//! start instants from file names.

mod disk;
mod http;

pub use disk::{scan_segments, DiskInventory};
pub use http::HttpInventory;

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One recorded segment as listed by an inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingDescriptor {
    pub path: String,
    /// Length in seconds; informational only.
    #[serde(default)]
    pub duration: f64,
    /// RFC 3339 start instant.
    pub start: String,
}

/// Source of segment listings.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Segments of `stream` overlapping `[start, start + duration)`, sorted by
    /// start. The first entry may begin before `start`.
    async fn find_segments(
        &self,
        stream: &str,
        start: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Result<Vec<RecordingDescriptor>>;
}

/// Inventory selected by the configuration: the HTTP service when
/// `playback.inventory_url` is set, the record directories otherwise.
pub fn from_config(config: Arc<Config>) -> Arc<dyn Inventory> {
    match &config.playback.inventory_url {
        Some(url) => {
            tracing::info!(url = %url, "using HTTP recording inventory");
            Arc::new(HttpInventory::new(
                url,
                Duration::from_secs(config.playback.inventory_timeout_secs),
            ))
        }
        None => {
            tracing::info!("scanning record directories for recordings");
            Arc::new(DiskInventory::new(config))
        }
    }
}
