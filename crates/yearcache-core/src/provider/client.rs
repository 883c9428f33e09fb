//! HTTP provider for the `/dapi` endpoint.
//!
//! Both fetch paths issue `GET {base_url}/dapi?{symbol}-{year}`. They differ
//! only in how the body is interpreted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::{composite_key, HubUpstream, ProviderError, UpstreamResponse, YearData, YearProvider};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Provider client. Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint URL for a composite key, e.g. `http://host/dapi?2330_TW-2025`.
    pub fn endpoint(&self, composite_key: &str) -> String {
        format!("{}/dapi?{}", self.base_url, composite_key)
    }

    /// Send a GET, retrying with exponential backoff while the server answers 429.
    async fn get_with_retry(&self, url: &str) -> Result<Response, ProviderError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.client.get(url).send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ProviderError::Throttled { retries: MAX_RATE_LIMIT_RETRIES });
            }
            warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }
}

#[async_trait]
impl YearProvider for HttpProvider {
    async fn fetch_year(&self, symbol: &str, year: i32) -> Result<YearData, ProviderError> {
        let url = self.endpoint(&composite_key(symbol, year));
        debug!(url = %url, "Fetching year");

        let response = self.get_with_retry(&url).await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(YearData::from_json(body))
    }
}

#[async_trait]
impl HubUpstream for HttpProvider {
    async fn fetch_composite(&self, composite_key: &str) -> Result<UpstreamResponse, ProviderError> {
        let url = self.endpoint(composite_key);
        debug!(url = %url, "Fetching for hub");

        // The envelope carries its own status, so the body is read whatever the HTTP status.
        let response = self.get_with_retry(&url).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}
