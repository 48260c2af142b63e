//! Full-sync orchestration
//!
//! The only component aware of "full sync" as opposed to "one page". Two
//! operating modes over the same chunk worker:
//!
//! - fire-and-forget: the caller gets an immediate acknowledgment and a
//!   detached task walks pages 1..N server-side with an inter-chunk delay;
//! - caller-driven: the caller invokes `sync_next_chunk` with an explicit
//!   page cursor until `has_more` is false, trading one long request for
//!   many short idempotent ones (no single call can hit an upstream
//!   request timeout).
//!
//! Pages are fetched strictly in increasing order and a chunk's `has_more`
//! is only acted on after its upserts have landed. A failed chunk aborts
//! the loop; the run keeps its accumulated progress plus the reason it
//! stopped, and resuming restarts from page 1. No durable cursor is kept;
//! idempotent upserts make the re-walk wasteful but correct.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::chunk_worker::{ChunkOutcome, ChunkedSyncWorker};
use crate::application::dto::StartSyncAck;
use crate::application::freshness::FreshnessPolicy;
use crate::application::snapshot::{Snapshot, SnapshotCache};
use crate::domain::account::{Account, AccountRef};
use crate::domain::errors::SyncError;
use crate::domain::repositories::RecordStore;
use crate::domain::sync_session::SyncSessionManager;

#[derive(Clone)]
pub struct SyncOrchestrator {
    worker: Arc<ChunkedSyncWorker>,
    sessions: Arc<SyncSessionManager>,
    store: Arc<dyn RecordStore>,
    snapshots: Arc<SnapshotCache>,
    policy: FreshnessPolicy,
    inter_chunk_delay: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        worker: Arc<ChunkedSyncWorker>,
        sessions: Arc<SyncSessionManager>,
        store: Arc<dyn RecordStore>,
        snapshots: Arc<SnapshotCache>,
        policy: FreshnessPolicy,
        inter_chunk_delay: Duration,
    ) -> Self {
        Self { worker, sessions, store, snapshots, policy, inter_chunk_delay }
    }

    /// Fire-and-forget full sync. Returns as soon as the run is registered;
    /// the page loop continues server-side. A concurrent run for the same
    /// account is rejected immediately without touching its counters; a
    /// fresh enough snapshot skips the sync entirely unless forced.
    pub async fn start_full_sync(
        &self,
        account: Account,
        force: bool,
    ) -> Result<StartSyncAck, SyncError> {
        let account_ref = account.account_ref;

        if !force {
            let last = self.sessions.last_completed_at(account_ref).await;
            if !self.policy.should_background_refresh(last) {
                info!(%account_ref, "skipping full sync, snapshot is fresh");
                return Ok(StartSyncAck::skipped("snapshot is fresh; pass force to re-sync"));
            }
        }

        let run_id = self.sessions.begin_run(account_ref).await?;

        let this = self.clone();
        tokio::spawn(async move {
            this.run_to_completion(account).await;
        });

        Ok(StartSyncAck::accepted(run_id))
    }

    /// Caller-driven mode: one chunk per call, the caller owns the page
    /// cursor. The first page (re)opens the run; `has_more == false` closes
    /// it and installs the rebuilt snapshot.
    pub async fn sync_next_chunk(
        &self,
        account: &Account,
        page: u32,
    ) -> Result<ChunkOutcome, SyncError> {
        let account_ref = account.account_ref;
        if !self.sessions.is_running(account_ref).await {
            self.sessions.begin_run(account_ref).await?;
        }

        match self.worker.sync_chunk(account, page).await {
            Ok(outcome) => {
                self.sessions
                    .record_chunk(account_ref, page, u64::from(outcome.items_processed))
                    .await;
                if !outcome.has_more {
                    self.finish_and_install(account_ref).await;
                }
                Ok(outcome)
            }
            Err(err) => {
                self.sessions.fail_run(account_ref, err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Silent background refresh: single-flight per account, serves readers
    /// from the held snapshot while it runs, and swaps the new snapshot in
    /// only when its composition differs.
    pub async fn start_background_refresh(&self, account: Account) {
        let account_ref = account.account_ref;
        if !self.snapshots.begin_refresh(account_ref).await {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.run_refresh(account).await;
            this.snapshots.end_refresh(account_ref).await;
        });
    }

    /// Detached-task body for the fire-and-forget mode.
    async fn run_to_completion(&self, account: Account) {
        let account_ref = account.account_ref;
        match self.walk_pages(&account).await {
            Ok(total) => {
                self.sessions.complete_run(account_ref).await;
                self.install_snapshot(account_ref, true).await;
                info!(%account_ref, total_processed = total, "full sync completed");
            }
            Err(err) => {
                self.sessions.fail_run(account_ref, err.to_string()).await;
                warn!(%account_ref, %err, "full sync aborted");
            }
        }
    }

    async fn run_refresh(&self, account: Account) {
        let account_ref = account.account_ref;
        match self.sessions.begin_run(account_ref).await {
            Ok(_) => {}
            Err(SyncError::ConcurrentSyncRejected { .. }) => return,
            Err(err) => {
                warn!(%account_ref, %err, "background refresh could not start");
                return;
            }
        }

        match self.walk_pages(&account).await {
            Ok(_) => {
                self.sessions.complete_run(account_ref).await;
                match self.store.bulk_read(account_ref, None).await {
                    Ok(records) => {
                        let swapped = self
                            .snapshots
                            .swap_if_changed(Snapshot::new(account_ref, records, true))
                            .await;
                        info!(%account_ref, swapped, "background refresh finished");
                    }
                    Err(err) => warn!(%account_ref, %err, "failed to rebuild snapshot after refresh"),
                }
            }
            Err(err) => {
                self.sessions.fail_run(account_ref, err.to_string()).await;
                warn!(%account_ref, %err, "background refresh aborted");
            }
        }
    }

    /// Sequential page walk from 1 until the remote reports no more pages.
    async fn walk_pages(&self, account: &Account) -> Result<u64, SyncError> {
        let account_ref = account.account_ref;
        let mut page: u32 = 1;
        let mut total: u64 = 0;
        loop {
            let outcome = self.worker.sync_chunk(account, page).await?;
            total += u64::from(outcome.items_processed);
            self.sessions
                .record_chunk(account_ref, page, u64::from(outcome.items_processed))
                .await;
            if !outcome.has_more {
                return Ok(total);
            }
            page += 1;
            // Intentional pause between chunks to respect the rate budget.
            tokio::time::sleep(self.inter_chunk_delay).await;
        }
    }

    async fn finish_and_install(&self, account_ref: AccountRef) {
        self.sessions.complete_run(account_ref).await;
        self.install_snapshot(account_ref, true).await;
    }

    async fn install_snapshot(&self, account_ref: AccountRef, complete: bool) {
        match self.store.bulk_read(account_ref, None).await {
            Ok(records) => {
                self.snapshots
                    .install(Snapshot::new(account_ref, records, complete))
                    .await;
            }
            Err(err) => warn!(%account_ref, %err, "failed to rebuild snapshot after sync"),
        }
    }
}
