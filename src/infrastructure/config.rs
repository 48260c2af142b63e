//! Engine configuration
//!
//! Every operational knob is externally tunable without code changes: page
//! size, request rate ceiling, staleness threshold, inter-chunk delay and
//! retry behavior. Configuration lives in one JSON file, loaded and saved
//! with tokio's fs; missing files fall back to defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::infrastructure::http_client::RateLimitedClientConfig;

/// Remote API access tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Entities per page; clamped to this even when callers ask for more.
    /// The remote nominally allows 250 but penalizes large pages with
    /// elevated timeout risk.
    pub max_page_size: u32,
    /// Per-account request ceiling enforced by blocking, never by dropping.
    pub max_requests_per_second: u32,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_page_size: 50,
            max_requests_per_second: 7,
            request_timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Sync loop and freshness tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTuning {
    /// Delay between chunks in the fire-and-forget loop; respects the rate
    /// budget and keeps each chunk short.
    pub inter_chunk_delay_ms: u64,
    /// Age of the last completed sync beyond which a silent background
    /// refresh is warranted.
    pub staleness_threshold_seconds: u64,
    /// Finished-run summaries retained for operator display.
    pub history_limit: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            inter_chunk_delay_ms: 300,
            staleness_threshold_seconds: 300,
            history_limit: 20,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub sync: SyncTuning,
}

impl SyncConfig {
    /// Load from a JSON file; missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Client configuration derived from the API section.
    pub fn client_config(&self) -> RateLimitedClientConfig {
        RateLimitedClientConfig {
            timeout_seconds: self.api.request_timeout_seconds,
            max_requests_per_second: self.api.max_requests_per_second,
            max_page_size: self.api.max_page_size,
            max_retries: self.api.max_retries,
            retry_base_delay_ms: self.api.retry_base_delay_ms,
            retry_max_delay_ms: self.api.retry_max_delay_ms,
            ..RateLimitedClientConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_remote_budget() {
        let config = SyncConfig::default();
        assert_eq!(config.api.max_page_size, 50);
        assert_eq!(config.api.max_requests_per_second, 7);
        assert_eq!(config.sync.inter_chunk_delay_ms, 300);
        assert_eq!(config.sync.staleness_threshold_seconds, 300);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crmsync.json");

        let mut config = SyncConfig::default();
        config.api.max_page_size = 25;
        config.sync.inter_chunk_delay_ms = 100;
        config.save(&path).await.unwrap();

        let loaded = SyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = SyncConfig::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(loaded, SyncConfig::default());
    }
}
