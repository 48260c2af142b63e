//! Caller-facing sync use cases
//!
//! Composes the resolver, orchestrator, snapshot cache, aggregator and
//! freshness policy into the engine's public surface. Every operation takes
//! an explicit `(customer_id, account_index)` pair; nothing is read from
//! ambient state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::application::aggregator::StatsAggregator;
use crate::application::chunk_worker::ChunkedSyncWorker;
use crate::application::dto::{ChunkStatus, SnapshotView, StartSyncAck, SyncRunStatusDto};
use crate::application::freshness::FreshnessPolicy;
use crate::application::orchestrator::SyncOrchestrator;
use crate::application::snapshot::{Snapshot, SnapshotCache};
use crate::domain::account::{Account, AccountRef, AccountResolver};
use crate::domain::errors::{ApiError, SyncError};
use crate::domain::filter::FilterSpec;
use crate::domain::lead::Tag;
use crate::domain::repositories::{CustomerStore, RecordStore};
use crate::domain::services::{CrmApi, CrmUser};
use crate::domain::stats::PipelineCatalog;
use crate::domain::sync_session::SyncSessionManager;
use crate::infrastructure::config::SyncConfig;

/// The engine's caller-facing facade.
pub struct SyncUseCases {
    resolver: AccountResolver,
    api: Arc<dyn CrmApi>,
    store: Arc<dyn RecordStore>,
    sessions: Arc<SyncSessionManager>,
    snapshots: Arc<SnapshotCache>,
    orchestrator: SyncOrchestrator,
    aggregator: StatsAggregator,
    policy: FreshnessPolicy,
    catalogs: RwLock<HashMap<AccountRef, Arc<PipelineCatalog>>>,
    users: RwLock<HashMap<AccountRef, Arc<Vec<CrmUser>>>>,
    tags: RwLock<HashMap<AccountRef, Arc<Vec<Tag>>>>,
}

impl SyncUseCases {
    pub fn new(
        api: Arc<dyn CrmApi>,
        store: Arc<dyn RecordStore>,
        customers: Arc<dyn CustomerStore>,
        config: &SyncConfig,
    ) -> Self {
        let sessions = Arc::new(SyncSessionManager::new(config.sync.history_limit));
        let snapshots = Arc::new(SnapshotCache::new());
        let policy =
            FreshnessPolicy::new(Duration::from_secs(config.sync.staleness_threshold_seconds));
        let worker = Arc::new(ChunkedSyncWorker::new(
            api.clone(),
            store.clone(),
            config.api.max_page_size,
        ));
        let orchestrator = SyncOrchestrator::new(
            worker,
            sessions.clone(),
            store.clone(),
            snapshots.clone(),
            policy,
            Duration::from_millis(config.sync.inter_chunk_delay_ms),
        );

        Self {
            resolver: AccountResolver::new(customers),
            aggregator: StatsAggregator::new(api.clone()),
            api,
            store,
            sessions,
            snapshots,
            orchestrator,
            policy,
            catalogs: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
        }
    }

    /// Start a fire-and-forget full sync. Returns only an acknowledgment;
    /// the page loop continues server-side after this call returns.
    pub async fn start_full_sync(
        &self,
        customer_id: i64,
        account_index: u32,
        force: bool,
    ) -> Result<StartSyncAck, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        self.orchestrator.start_full_sync(account, force).await
    }

    /// Drive one chunk of a caller-driven full sync. The caller increments
    /// `page` until `has_more` is false, displaying progress after every
    /// call.
    pub async fn sync_next_chunk(
        &self,
        customer_id: i64,
        account_index: u32,
        page: u32,
    ) -> Result<ChunkStatus, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        let outcome = self.orchestrator.sync_next_chunk(&account, page).await?;
        let total_processed = self
            .sessions
            .get_run(account.account_ref)
            .await
            .map_or(u64::from(outcome.items_processed), |run| run.total_processed);
        Ok(ChunkStatus {
            page,
            items_processed: outcome.items_processed,
            has_more: outcome.has_more,
            total_processed,
        })
    }

    /// Serve the held snapshot plus statistics for a filter. Triggers a
    /// silent background refresh when the snapshot has gone stale; the
    /// current view is served meanwhile.
    pub async fn get_snapshot(
        &self,
        customer_id: i64,
        account_index: u32,
        filter: Option<FilterSpec>,
    ) -> Result<SnapshotView, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        let account_ref = account.account_ref;
        let filter = filter.unwrap_or_default();

        let snapshot = match self.snapshots.get(account_ref).await {
            Some(snapshot) => snapshot,
            None => self.materialize_from_store(account_ref).await?,
        };

        let catalog = self.pipeline_catalog(&account).await?;
        let (stats, route) = self
            .aggregator
            .aggregate(&account, &snapshot.records, &filter, &catalog, snapshot.complete)
            .await?;

        let last_synced = self.sessions.last_completed_at(account_ref).await;
        let stale = self.policy.should_background_refresh(last_synced);
        if stale {
            self.orchestrator.start_background_refresh(account.clone()).await;
        }

        // Soft-deleted records are mirrored for bookkeeping, never served.
        let records = snapshot
            .records
            .iter()
            .filter(|r| !r.is_deleted && filter.matches(r))
            .cloned()
            .collect();

        Ok(SnapshotView {
            records,
            stats,
            complete: snapshot.complete,
            route,
            fetched_at: snapshot.fetched_at,
            stale,
        })
    }

    /// Age of the account's last completed sync; `None` when it never
    /// synced.
    pub async fn freshness_age(
        &self,
        customer_id: i64,
        account_index: u32,
    ) -> Result<Option<Duration>, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        let last = self.sessions.last_completed_at(account.account_ref).await;
        Ok(self.policy.age(last))
    }

    /// Current run state for the account, if any.
    pub async fn sync_status(
        &self,
        customer_id: i64,
        account_index: u32,
    ) -> Result<Option<SyncRunStatusDto>, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        Ok(self
            .sessions
            .get_run(account.account_ref)
            .await
            .map(SyncRunStatusDto::from))
    }

    /// Finished-run summaries, oldest first.
    pub async fn sync_history(&self) -> Vec<SyncRunStatusDto> {
        self.sessions
            .history()
            .await
            .into_iter()
            .map(SyncRunStatusDto::from)
            .collect()
    }

    /// The account's user directory, pulled once and cached. A missing
    /// users resource is non-fatal and yields an empty directory.
    pub async fn list_users(
        &self,
        customer_id: i64,
        account_index: u32,
    ) -> Result<Arc<Vec<CrmUser>>, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        if let Some(users) = self.users.read().await.get(&account.account_ref) {
            return Ok(users.clone());
        }

        let users = match self.api.fetch_users(&account).await {
            Ok(users) => users,
            Err(ApiError::NotFound { resource }) => {
                warn!(
                    account = %account.account_ref,
                    resource,
                    "users resource missing, serving an empty directory"
                );
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let users = Arc::new(users);
        self.users.write().await.insert(account.account_ref, users.clone());
        Ok(users)
    }

    /// The account-wide tag list, pulled once and cached. A missing tags
    /// resource is non-fatal and yields an empty list.
    pub async fn list_tags(
        &self,
        customer_id: i64,
        account_index: u32,
    ) -> Result<Arc<Vec<Tag>>, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        if let Some(tags) = self.tags.read().await.get(&account.account_ref) {
            return Ok(tags.clone());
        }

        let tags = match self.api.fetch_tags(&account).await {
            Ok(tags) => tags,
            Err(ApiError::NotFound { resource }) => {
                warn!(
                    account = %account.account_ref,
                    resource,
                    "tags resource missing, serving an empty list"
                );
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let tags = Arc::new(tags);
        self.tags.write().await.insert(account.account_ref, tags.clone());
        Ok(tags)
    }

    /// Switch a customer's active account. Previously-held snapshots, run
    /// state and reference catalogs for that customer are invalidated; they
    /// are not interchangeable across accounts.
    pub async fn switch_active_account(
        &self,
        customer_id: i64,
        account_index: u32,
    ) -> Result<Account, SyncError> {
        let account = self.resolver.resolve(customer_id, account_index).await?;
        self.snapshots.invalidate_customer(customer_id).await;
        self.sessions.invalidate_customer(customer_id).await;
        self.catalogs
            .write()
            .await
            .retain(|account_ref, _| account_ref.customer_id != customer_id);
        self.users
            .write()
            .await
            .retain(|account_ref, _| account_ref.customer_id != customer_id);
        self.tags
            .write()
            .await
            .retain(|account_ref, _| account_ref.customer_id != customer_id);
        info!(customer_id, account_index, "active account switched, caches invalidated");
        Ok(account)
    }

    /// Build a snapshot from whatever the store currently holds. Complete
    /// only when a full sync has finished for the account; a half-written
    /// store (failed run) yields an explicitly partial snapshot.
    async fn materialize_from_store(
        &self,
        account_ref: AccountRef,
    ) -> Result<Arc<Snapshot>, SyncError> {
        let records = self.store.bulk_read(account_ref, None).await?;
        let complete = self.sessions.has_completed_sync(account_ref).await;
        let snapshot = Snapshot::new(account_ref, records, complete);
        self.snapshots.install(snapshot).await;
        self.snapshots
            .get(account_ref)
            .await
            .ok_or_else(|| SyncError::storage("snapshot vanished after install"))
    }

    /// Pipeline catalog for the account, fetched once and cached. A missing
    /// pipelines resource is non-fatal: stage typing falls back to the
    /// fixed terminal ids.
    async fn pipeline_catalog(&self, account: &Account) -> Result<Arc<PipelineCatalog>, SyncError> {
        if let Some(catalog) = self.catalogs.read().await.get(&account.account_ref) {
            return Ok(catalog.clone());
        }

        let catalog = match self.api.fetch_pipeline_catalog(account).await {
            Ok(catalog) => catalog,
            Err(ApiError::NotFound { resource }) => {
                warn!(
                    account = %account.account_ref,
                    resource,
                    "pipelines resource missing, using terminal-id fallback"
                );
                PipelineCatalog::default()
            }
            Err(err) => return Err(err.into()),
        };

        let catalog = Arc::new(catalog);
        self.catalogs
            .write()
            .await
            .insert(account.account_ref, catalog.clone());
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::infrastructure::config::SyncConfig;
    use crate::test_utils::{test_account, TestContext};

    #[tokio::test]
    async fn user_directory_is_pulled_across_pages_and_cached() {
        let ctx = TestContext::new().await;
        let account_ref = test_account().account_ref;
        // More entries than one page holds, so the pull must walk pages.
        ctx.api.seed_users(
            account_ref,
            (1..=60i64).map(|id| json!({"id": id, "name": format!("user-{id}")})).collect(),
        );
        let uc = ctx.use_cases(&SyncConfig::default());

        let users = uc.list_users(1, 0).await.unwrap();
        assert_eq!(users.len(), 60);
        assert_eq!(users[0].name, "user-1");

        // Re-seeding does not show through the cache.
        ctx.api.seed_users(account_ref, vec![json!({"id": 999, "name": "late"})]);
        let cached = uc.list_users(1, 0).await.unwrap();
        assert_eq!(cached.len(), 60);
    }

    #[tokio::test]
    async fn tag_list_is_dropped_on_account_switch() {
        let ctx = TestContext::new().await;
        let account_ref = test_account().account_ref;
        ctx.api.seed_tags(
            account_ref,
            vec![json!({"id": 1, "name": "hot"}), json!({"id": 2, "name": "cold"})],
        );
        let uc = ctx.use_cases(&SyncConfig::default());

        let tags = uc.list_tags(1, 0).await.unwrap();
        assert_eq!(tags.len(), 2);

        // Switching invalidates the cached list; the next call re-pulls.
        ctx.api.seed_tags(account_ref, vec![json!({"id": 3, "name": "warm"})]);
        uc.switch_active_account(1, 0).await.unwrap();
        let tags = uc.list_tags(1, 0).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "warm");
    }
}
