//! Rate-limited HTTP client for the remote CRM API
//!
//! Wraps every CRM call behind a per-account rate limiter (the remote API
//! allows roughly 7 requests per second per account and returns 429, then
//! 403 on sustained abuse). The limiter blocks the caller until a slot is
//! free; requests are never dropped. Transport failures are classified into
//! the [`ApiError`] taxonomy and retryable ones get bounded exponential
//! backoff.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::account::{Account, AccountRef};
use crate::domain::errors::ApiError;
use crate::domain::services::{RawPage, ResourceKind};

/// Remote hard limit on entities per page. Larger pages carry elevated
/// timeout risk, so the configurable maximum defaults well below this.
pub const REMOTE_PAGE_SIZE_LIMIT: u32 = 250;

type AccountLimiter = RateLimiter<AccountRef, DefaultKeyedStateStore<AccountRef>, DefaultClock>;

/// HTTP client configuration for CRM access.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitedClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub max_page_size: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RateLimitedClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "crmsync/0.2".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 7,
            max_page_size: 50,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Classify an HTTP status into the error taxonomy. `Ok(())` for 2xx.
pub fn classify_status(status: u16, resource: &str, page: u32) -> Result<(), ApiError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(ApiError::RateLimited),
        401 | 403 => Err(ApiError::Unauthorized { status }),
        404 => Err(ApiError::NotFound { resource: resource.to_string() }),
        500..=599 => Err(ApiError::ServerError { status }),
        other => Err(ApiError::malformed(page, format!("unexpected HTTP status {other}"))),
    }
}

/// Wire shape of one paginated CRM response.
#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    has_more: bool,
}

/// CRM HTTP client with per-account rate limiting and classified errors.
pub struct RateLimitedClient {
    client: Client,
    rate_limiter: AccountLimiter,
    config: RateLimitedClientConfig,
}

impl RateLimitedClient {
    pub fn new(config: RateLimitedClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ApiError::Transport { message: format!("invalid user agent: {e}") })?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Transport { message: format!("failed to build HTTP client: {e}") })?;

        let rps = NonZeroU32::new(config.max_requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::keyed(Quota::per_second(rps));

        Ok(Self { client, rate_limiter, config })
    }

    pub fn config(&self) -> &RateLimitedClientConfig {
        &self.config
    }

    /// Effective page size after clamping to the configured maximum (itself
    /// bounded by the remote hard limit).
    pub fn clamp_page_size(&self, requested: u32) -> u32 {
        requested
            .max(1)
            .min(self.config.max_page_size)
            .min(REMOTE_PAGE_SIZE_LIMIT)
    }

    /// Fetch one page of a paginated resource.
    pub async fn fetch_page(
        &self,
        account: &Account,
        kind: ResourceKind,
        page: u32,
        page_size: u32,
    ) -> Result<RawPage, ApiError> {
        let page_size = self.clamp_page_size(page_size);
        let url = resource_url(&account.base_url, kind.path());
        let query = [("page", page.to_string()), ("limit", page_size.to_string())];

        let body = self
            .get_with_retry(account, &url, &query, kind.path(), page)
            .await?;

        let parsed: PageBody = serde_json::from_value(body)
            .map_err(|e| ApiError::malformed(page, format!("unexpected page shape: {e}")))?;

        debug!(
            account = %account.account_ref,
            resource = kind.path(),
            page,
            items = parsed.items.len(),
            has_more = parsed.has_more,
            "fetched CRM page"
        );
        Ok(RawPage { items: parsed.items, has_more: parsed.has_more })
    }

    /// GET a JSON endpoint under the account's API root with rate limiting
    /// and bounded retry. Used by the aggregation endpoint.
    pub async fn get_json(
        &self,
        account: &Account,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let url = resource_url(&account.base_url, path);
        self.get_with_retry(account, &url, query, path, 0).await
    }

    async fn get_with_retry(
        &self,
        account: &Account,
        url: &str,
        query: &[(&str, String)],
        resource: &str,
        page: u32,
    ) -> Result<Value, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(account, url, query, resource, page).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = self.retry_backoff(attempt);
                    warn!(
                        account = %account.account_ref,
                        resource,
                        %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable CRM API failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_once(
        &self,
        account: &Account,
        url: &str,
        query: &[(&str, String)],
        resource: &str,
        page: u32,
    ) -> Result<Value, ApiError> {
        // Blocks until the account's rate budget has a free slot.
        self.rate_limiter.until_key_ready(&account.account_ref).await;

        let response = self
            .client
            .get(url)
            .bearer_auth(&account.credential_ref)
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Transport { message: e.to_string() })?;

        classify_status(response.status().as_u16(), resource, page)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::malformed(page, format!("response body is not JSON: {e}")))
    }

    /// Exponential backoff for attempt N (1-based), capped at the configured
    /// maximum.
    fn retry_backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .retry_base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exp.min(self.config.retry_max_delay_ms))
    }
}

fn resource_url(base_url: &str, path: &str) -> String {
    format!("{}/api/v4/{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RateLimitedClient {
        RateLimitedClient::new(RateLimitedClientConfig::default()).unwrap()
    }

    #[test]
    fn page_size_is_clamped_to_safe_maximum() {
        let client = client();
        assert_eq!(client.clamp_page_size(250), 50);
        assert_eq!(client.clamp_page_size(50), 50);
        assert_eq!(client.clamp_page_size(10), 10);
        assert_eq!(client.clamp_page_size(0), 1);

        let wide = RateLimitedClient::new(RateLimitedClientConfig {
            max_page_size: 1000,
            ..RateLimitedClientConfig::default()
        })
        .unwrap();
        // The remote hard limit still applies even with a generous config.
        assert_eq!(wide.clamp_page_size(1000), REMOTE_PAGE_SIZE_LIMIT);
    }

    #[test]
    fn status_classification_covers_taxonomy() {
        assert!(classify_status(200, "leads", 1).is_ok());
        assert!(matches!(classify_status(429, "leads", 1), Err(ApiError::RateLimited)));
        assert!(matches!(
            classify_status(401, "leads", 1),
            Err(ApiError::Unauthorized { status: 401 })
        ));
        assert!(matches!(
            classify_status(403, "leads", 1),
            Err(ApiError::Unauthorized { status: 403 })
        ));
        assert!(matches!(classify_status(404, "leads/tags", 1), Err(ApiError::NotFound { .. })));
        assert!(matches!(
            classify_status(502, "leads", 1),
            Err(ApiError::ServerError { status: 502 })
        ));
        assert!(matches!(
            classify_status(418, "leads", 3),
            Err(ApiError::MalformedResponse { page: 3, .. })
        ));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let client = client();
        assert_eq!(client.retry_backoff(1), Duration::from_millis(500));
        assert_eq!(client.retry_backoff(2), Duration::from_millis(1000));
        assert_eq!(client.retry_backoff(3), Duration::from_millis(2000));
        assert_eq!(client.retry_backoff(30), Duration::from_millis(30_000));
    }

    #[test]
    fn resource_urls_tolerate_trailing_slash() {
        assert_eq!(
            resource_url("https://acme.example/", "leads"),
            "https://acme.example/api/v4/leads"
        );
        assert_eq!(
            resource_url("https://acme.example", "leads/pipelines"),
            "https://acme.example/api/v4/leads/pipelines"
        );
    }
}
