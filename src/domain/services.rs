//! Remote CRM API interface
//!
//! The engine talks to the CRM through this trait only; the HTTP
//! implementation lives in the infrastructure layer and tests substitute an
//! in-memory mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::account::Account;
use crate::domain::errors::ApiError;
use crate::domain::filter::FilterSpec;
use crate::domain::lead::Tag;
use crate::domain::stats::{AggregateStats, PipelineCatalog};

/// Paginated CRM resources the engine pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Leads,
    Pipelines,
    Users,
    Tags,
}

impl ResourceKind {
    /// Path segment under the CRM's versioned API root.
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Leads => "leads",
            ResourceKind::Pipelines => "leads/pipelines",
            ResourceKind::Users => "users",
            ResourceKind::Tags => "leads/tags",
        }
    }
}

/// One page of raw records as returned by the remote API.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub has_more: bool,
}

/// An account user as listed by the CRM's user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmUser {
    pub id: i64,
    pub name: String,
}

/// Pull `id` and `name` out of a directory entry; entries missing either
/// field are skipped.
fn parse_named(item: &Value) -> Option<(i64, String)> {
    let id = item.get("id")?.as_i64()?;
    let name = item.get("name")?.as_str()?.to_string();
    Some((id, name))
}

/// Remote CRM API as the engine needs it: paginated reads per resource plus
/// the server-side aggregation endpoint.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Fetch one page of a resource. `page` is 1-based; `page_size` may be
    /// clamped by the implementation.
    async fn fetch_page(
        &self,
        account: &Account,
        kind: ResourceKind,
        page: u32,
        page_size: u32,
    ) -> Result<RawPage, ApiError>;

    /// Server-side aggregation over the same filter the local path applies.
    /// Returned totals and distribution are trusted verbatim.
    async fn fetch_stats(
        &self,
        account: &Account,
        filter: &FilterSpec,
    ) -> Result<AggregateStats, ApiError>;

    /// Drain a resource completely by walking its pages.
    async fn fetch_all_items(
        &self,
        account: &Account,
        kind: ResourceKind,
    ) -> Result<Vec<Value>, ApiError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let raw = self.fetch_page(account, kind, page, 50).await?;
            items.extend(raw.items);
            if !raw.has_more {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// Pull the full pipeline catalog by paging through the pipelines
    /// resource. Pipelines that fail to parse are skipped; the aggregator
    /// falls back to the fixed terminal ids for them.
    async fn fetch_pipeline_catalog(&self, account: &Account) -> Result<PipelineCatalog, ApiError> {
        let items = self.fetch_all_items(account, ResourceKind::Pipelines).await?;
        let defs = items.iter().filter_map(PipelineCatalog::parse_pipeline).collect();
        Ok(PipelineCatalog::new(defs))
    }

    /// Pull the account's user directory. Malformed entries are skipped.
    async fn fetch_users(&self, account: &Account) -> Result<Vec<CrmUser>, ApiError> {
        let items = self.fetch_all_items(account, ResourceKind::Users).await?;
        Ok(items
            .iter()
            .filter_map(parse_named)
            .map(|(id, name)| CrmUser { id, name })
            .collect())
    }

    /// Pull the account-wide tag list. Malformed entries are skipped.
    async fn fetch_tags(&self, account: &Account) -> Result<Vec<Tag>, ApiError> {
        let items = self.fetch_all_items(account, ResourceKind::Tags).await?;
        Ok(items
            .iter()
            .filter_map(parse_named)
            .map(|(id, name)| Tag { id, name })
            .collect())
    }
}
