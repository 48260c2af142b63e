//! HTTP implementation of the CRM API interface
//!
//! Thin layer over [`RateLimitedClient`]: builds resource queries, maps the
//! filter onto the remote aggregation endpoint's parameters, and parses its
//! response. The rate budget, retry policy and error classification all live
//! in the client.

use async_trait::async_trait;

use crate::domain::account::Account;
use crate::domain::errors::ApiError;
use crate::domain::filter::{DateField, FilterSpec};
use crate::domain::services::{CrmApi, RawPage, ResourceKind};
use crate::domain::stats::AggregateStats;
use crate::infrastructure::http_client::RateLimitedClient;

/// CRM API over HTTP.
pub struct HttpCrmApi {
    client: RateLimitedClient,
}

impl HttpCrmApi {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }
}

/// Query parameters for the remote aggregation endpoint, identical in
/// meaning to the local predicate.
fn stats_query(filter: &FilterSpec) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    query.push((
        "date_field",
        match filter.date_field {
            DateField::Created => "created".to_string(),
            DateField::Closed => "closed".to_string(),
        },
    ));
    if let Some(from) = filter.date_from {
        query.push(("date_from", from.to_string()));
    }
    if let Some(to) = filter.date_to {
        query.push(("date_to", to.to_string()));
    }
    if let Some(user) = filter.responsible_user_id {
        query.push(("responsible_user_id", user.to_string()));
    }
    if let Some(pipeline_id) = filter.pipeline_id {
        query.push(("pipeline_id", pipeline_id.to_string()));
    }
    if !filter.tag_ids.is_empty() {
        let tags = filter
            .tag_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        query.push(("tag_ids", tags));
    }
    query
}

#[async_trait]
impl CrmApi for HttpCrmApi {
    async fn fetch_page(
        &self,
        account: &Account,
        kind: ResourceKind,
        page: u32,
        page_size: u32,
    ) -> Result<RawPage, ApiError> {
        self.client.fetch_page(account, kind, page, page_size).await
    }

    async fn fetch_stats(
        &self,
        account: &Account,
        filter: &FilterSpec,
    ) -> Result<AggregateStats, ApiError> {
        let query = stats_query(filter);
        let body = self.client.get_json(account, "leads/stats", &query).await?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::malformed(0, format!("unexpected stats shape: {e}")))
    }
}
