//! Memory-based sync-run state management
//!
//! Run state is kept in memory only and final summaries are retained in a
//! bounded history; a process restart simply restarts a full sync from page 1
//! (upserts are idempotent, so a re-run is wasteful but never incorrect).
//! The per-account single-flight rule is enforced here: at most one running
//! full sync per `(customer, account index)`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::account::AccountRef;
use crate::domain::errors::SyncError;

/// Current status of one full-sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

/// State of one full-sync run, live while running and retained in history
/// once finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: String,
    pub account_ref: AccountRef,
    pub status: SyncRunStatus,
    /// Last page handed to the worker (1-based); 0 before the first chunk.
    pub current_page: u32,
    pub total_processed: u64,
    /// Items recorded per page; a replayed page overwrites its own entry so
    /// `total_processed` never double-counts it.
    pub page_counts: BTreeMap<u32, u64>,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the run stopped, when it failed.
    pub error: Option<String>,
}

/// Thread-safe in-memory manager for sync runs.
#[derive(Debug)]
pub struct SyncSessionManager {
    runs: Arc<RwLock<HashMap<AccountRef, SyncRun>>>,
    history: Arc<RwLock<VecDeque<SyncRun>>>,
    history_limit: usize,
}

impl SyncSessionManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            history_limit,
        }
    }

    /// Register a new run for the account. Rejects immediately when one is
    /// already running; the in-flight run's counters are left untouched.
    pub async fn begin_run(&self, account_ref: AccountRef) -> Result<String, SyncError> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&account_ref) {
            if existing.status == SyncRunStatus::Running {
                tracing::warn!(%account_ref, run_id = %existing.run_id, "rejecting concurrent full sync");
                return Err(SyncError::ConcurrentSyncRejected { account_ref });
            }
        }

        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        runs.insert(
            account_ref,
            SyncRun {
                run_id: run_id.clone(),
                account_ref,
                status: SyncRunStatus::Running,
                current_page: 0,
                total_processed: 0,
                page_counts: BTreeMap::new(),
                started_at: now,
                last_updated_at: now,
                completed_at: None,
                error: None,
            },
        );
        tracing::info!(%account_ref, %run_id, "full sync run started");
        Ok(run_id)
    }

    /// Record one finished chunk on the running run.
    pub async fn record_chunk(&self, account_ref: AccountRef, page: u32, items_processed: u64) {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(&account_ref) {
            run.current_page = run.current_page.max(page);
            run.page_counts.insert(page, items_processed);
            run.total_processed = run.page_counts.values().sum();
            run.last_updated_at = Utc::now();
        }
    }

    pub async fn complete_run(&self, account_ref: AccountRef) {
        self.finish_run(account_ref, SyncRunStatus::Completed, None).await;
    }

    pub async fn fail_run(&self, account_ref: AccountRef, error: String) {
        self.finish_run(account_ref, SyncRunStatus::Failed, Some(error)).await;
    }

    async fn finish_run(&self, account_ref: AccountRef, status: SyncRunStatus, error: Option<String>) {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(&account_ref) else {
            return;
        };
        run.status = status;
        run.error = error;
        let now = Utc::now();
        run.last_updated_at = now;
        run.completed_at = Some(now);
        tracing::info!(
            %account_ref,
            run_id = %run.run_id,
            ?status,
            total_processed = run.total_processed,
            "full sync run finished"
        );

        let snapshot = run.clone();
        drop(runs);
        let mut history = self.history.write().await;
        history.push_back(snapshot);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    pub async fn get_run(&self, account_ref: AccountRef) -> Option<SyncRun> {
        self.runs.read().await.get(&account_ref).cloned()
    }

    pub async fn is_running(&self, account_ref: AccountRef) -> bool {
        self.runs
            .read()
            .await
            .get(&account_ref)
            .is_some_and(|run| run.status == SyncRunStatus::Running)
    }

    /// When the account's most recent run completed successfully, if ever.
    pub async fn last_completed_at(&self, account_ref: AccountRef) -> Option<DateTime<Utc>> {
        let runs = self.runs.read().await;
        if let Some(run) = runs.get(&account_ref) {
            if run.status == SyncRunStatus::Completed {
                return run.completed_at;
            }
        }
        drop(runs);
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|run| run.account_ref == account_ref && run.status == SyncRunStatus::Completed)
            .and_then(|run| run.completed_at)
    }

    /// Whether the account has ever finished a full sync successfully (i.e.
    /// the local record set is a complete snapshot of the remote one).
    pub async fn has_completed_sync(&self, account_ref: AccountRef) -> bool {
        self.last_completed_at(account_ref).await.is_some()
    }

    /// Drop run state for every account of a customer. Used when the active
    /// account changes; runs are not interchangeable across accounts.
    pub async fn invalidate_customer(&self, customer_id: i64) {
        let mut runs = self.runs.write().await;
        runs.retain(|account_ref, _| account_ref.customer_id != customer_id);
        let mut history = self.history.write().await;
        history.retain(|run| run.account_ref.customer_id != customer_id);
    }

    /// Finished-run summaries, oldest first.
    pub async fn history(&self) -> Vec<SyncRun> {
        self.history.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(customer_id: i64) -> AccountRef {
        AccountRef::new(customer_id, 0)
    }

    #[tokio::test]
    async fn second_begin_while_running_is_rejected() {
        let manager = SyncSessionManager::new(10);
        manager.begin_run(acc(1)).await.unwrap();
        manager.record_chunk(acc(1), 2, 50).await;

        let err = manager.begin_run(acc(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentSyncRejected { .. }));

        // The in-flight run's counters are untouched by the rejection.
        let run = manager.get_run(acc(1)).await.unwrap();
        assert_eq!(run.total_processed, 50);
        assert_eq!(run.current_page, 2);
    }

    #[tokio::test]
    async fn replayed_page_does_not_double_count() {
        let manager = SyncSessionManager::new(10);
        manager.begin_run(acc(1)).await.unwrap();
        manager.record_chunk(acc(1), 1, 50).await;
        manager.record_chunk(acc(1), 1, 50).await;
        manager.record_chunk(acc(1), 2, 20).await;

        let run = manager.get_run(acc(1)).await.unwrap();
        assert_eq!(run.total_processed, 70);
        assert_eq!(run.current_page, 2);
    }

    #[tokio::test]
    async fn begin_after_completion_starts_a_fresh_run() {
        let manager = SyncSessionManager::new(10);
        let first = manager.begin_run(acc(1)).await.unwrap();
        manager.complete_run(acc(1)).await;
        let second = manager.begin_run(acc(1)).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn failed_run_keeps_progress_and_reason() {
        let manager = SyncSessionManager::new(10);
        manager.begin_run(acc(1)).await.unwrap();
        manager.record_chunk(acc(1), 1, 50).await;
        manager.fail_run(acc(1), "rate limited by remote CRM API".into()).await;

        let run = manager.get_run(acc(1)).await.unwrap();
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.total_processed, 50);
        assert_eq!(run.error.as_deref(), Some("rate limited by remote CRM API"));
        assert!(!manager.has_completed_sync(acc(1)).await);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let manager = SyncSessionManager::new(2);
        for _ in 0..4 {
            manager.begin_run(acc(1)).await.unwrap();
            manager.complete_run(acc(1)).await;
        }
        assert_eq!(manager.history().await.len(), 2);
    }

    #[tokio::test]
    async fn invalidate_customer_drops_runs_for_all_indexes() {
        let manager = SyncSessionManager::new(10);
        manager.begin_run(AccountRef::new(1, 0)).await.unwrap();
        manager.begin_run(AccountRef::new(1, 1)).await.unwrap();
        manager.begin_run(AccountRef::new(2, 0)).await.unwrap();

        manager.invalidate_customer(1).await;
        assert!(manager.get_run(AccountRef::new(1, 0)).await.is_none());
        assert!(manager.get_run(AccountRef::new(1, 1)).await.is_none());
        assert!(manager.get_run(AccountRef::new(2, 0)).await.is_some());
    }
}
