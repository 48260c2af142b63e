//! Caller-facing data transfer objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::aggregator::AggregationRoute;
use crate::domain::lead::LeadRecord;
use crate::domain::stats::AggregateStats;
use crate::domain::sync_session::{SyncRun, SyncRunStatus};

/// Acknowledgment of a fire-and-forget full-sync request. The loop itself
/// continues server-side after this is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSyncAck {
    pub accepted: bool,
    pub run_id: Option<String>,
    pub message: String,
}

impl StartSyncAck {
    pub fn accepted(run_id: String) -> Self {
        Self {
            accepted: true,
            run_id: Some(run_id),
            message: "full sync started".to_string(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self { accepted: false, run_id: None, message: message.into() }
    }
}

/// Progress after one caller-driven chunk, for display after every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatus {
    pub page: u32,
    pub items_processed: u32,
    pub has_more: bool,
    /// Accumulated across the whole run, not just this chunk.
    pub total_processed: u64,
}

/// Materialized snapshot plus the statistics computed for it.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub records: Vec<LeadRecord>,
    pub stats: AggregateStats,
    /// Whether the records cover the account's full remote set.
    pub complete: bool,
    /// Which computation path produced `stats`.
    pub route: AggregationRoute,
    pub fetched_at: DateTime<Utc>,
    /// True when the snapshot's age crossed the staleness threshold (a
    /// background refresh has been triggered; this view still serves the
    /// held data).
    pub stale: bool,
}

/// Run state for operator display: partial progress plus the specific
/// reason the run stopped, so resuming is an informed decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunStatusDto {
    pub run_id: String,
    pub status: SyncRunStatus,
    pub current_page: u32,
    pub total_processed: u64,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<SyncRun> for SyncRunStatusDto {
    fn from(run: SyncRun) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            current_page: run.current_page,
            total_processed: run.total_processed,
            started_at: run.started_at,
            last_updated_at: run.last_updated_at,
            error: run.error,
        }
    }
}
