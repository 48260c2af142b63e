//! Chunked sync worker: one page per invocation
//!
//! Pulls exactly one page of leads, normalizes each raw record and upserts
//! it into the record store. No cross-page state is retained here; the
//! caller owns the cursor. Replaying the same `(account, page)` is safe
//! because upserts merge by remote id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::domain::account::Account;
use crate::domain::errors::{ApiError, SyncError};
use crate::domain::lead::LeadPatch;
use crate::domain::repositories::RecordStore;
use crate::domain::services::{CrmApi, ResourceKind};

/// Outcome of one chunk: how many records landed, and whether the remote
/// has more pages. `has_more` is only reported after every upsert of this
/// page has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub items_processed: u32,
    pub has_more: bool,
}

pub struct ChunkedSyncWorker {
    api: Arc<dyn CrmApi>,
    store: Arc<dyn RecordStore>,
    page_size: u32,
}

impl ChunkedSyncWorker {
    pub fn new(api: Arc<dyn CrmApi>, store: Arc<dyn RecordStore>, page_size: u32) -> Self {
        Self { api, store, page_size }
    }

    /// Pull and persist one page of leads. A malformed record aborts the
    /// chunk and surfaces the page index for diagnosis.
    pub async fn sync_chunk(&self, account: &Account, page: u32) -> Result<ChunkOutcome, SyncError> {
        let raw = self
            .api
            .fetch_page(account, ResourceKind::Leads, page, self.page_size)
            .await?;

        let mut items_processed: u32 = 0;
        for item in &raw.items {
            let patch = LeadPatch::from_raw(item).map_err(|e| {
                error!(account = %account.account_ref, page, reason = %e.reason, "malformed lead record");
                SyncError::Api(ApiError::malformed(page, e.reason))
            })?;
            self.store
                .upsert(account.account_ref, &patch)
                .await
                .map_err(|err| retag_page(err, page))?;
            items_processed += 1;
        }

        debug!(
            account = %account.account_ref,
            page,
            items_processed,
            has_more = raw.has_more,
            "chunk synced"
        );
        Ok(ChunkOutcome { items_processed, has_more: raw.has_more })
    }
}

/// The store reports merge failures without knowing which page the payload
/// came from; attach it here where it is known.
fn retag_page(err: SyncError, page: u32) -> SyncError {
    match err {
        SyncError::Api(ApiError::MalformedResponse { reason, .. }) => {
            SyncError::Api(ApiError::MalformedResponse { page, reason })
        }
        other => other,
    }
}
