//! Staleness policy for background refresh

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Decides whether a silent background re-pull is warranted given the age
/// of the last completed sync. The caller keeps serving the held snapshot
/// while the refresh runs.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    staleness_threshold: Duration,
}

impl FreshnessPolicy {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self { staleness_threshold }
    }

    /// Age of the last sync, or `None` when the account never synced.
    pub fn age(&self, last_synced_at: Option<DateTime<Utc>>) -> Option<Duration> {
        last_synced_at.map(|ts| (Utc::now() - ts).to_std().unwrap_or(Duration::ZERO))
    }

    /// True when the last sync is older than the threshold, or missing
    /// entirely.
    pub fn should_background_refresh(&self, last_synced_at: Option<DateTime<Utc>>) -> bool {
        match self.age(last_synced_at) {
            Some(age) => age > self.staleness_threshold,
            None => true,
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self { staleness_threshold: Duration::from_secs(300) }
    }
}
