//! Rate-limited, retrying HTTP client for the product catalog.
//!
//! Mirrors the original's two stacked `http.RoundTripper`s: a token-bucket
//! limiter that waits cooperatively before every request, wrapping a retry
//! layer that sleeps and retries on HTTP 420/429 (legacy-Twitter and
//! standard rate-limit codes, treated identically) up to a configured cap.

use governor::{Quota, RateLimiter};
use model::{Product, Sku};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("product not found for sku {0}")]
    ProductNotFound(Sku),
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog returned unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("max retries ({0}) reached against the catalog")]
    MaxRetriesReached(u32),
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    name: String,
    price: u32,
    sku: u64,
}

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Limiter,
    max_retries: u32,
    retry_backoff: Duration,
}

impl CatalogClient {
    pub fn new(
        base_url: String,
        api_key: String,
        call_timeout: Duration,
        rate_per_sec: u32,
        burst: u32,
        max_retries: u32,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder().timeout(call_timeout).build()?;

        let rate = NonZeroU32::new(rate_per_sec.max(1)).expect("rate_per_sec.max(1) is never zero");
        let burst = NonZeroU32::new(burst.max(1)).expect("burst.max(1) is never zero");
        let limiter = RateLimiter::direct(Quota::per_second(rate).allow_burst(burst));

        Ok(Self {
            http,
            base_url,
            api_key,
            limiter,
            max_retries,
            retry_backoff: Duration::from_millis(200),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_product_by_sku(&self, sku: Sku) -> Result<Product, CatalogError> {
        let url = format!("{}/product/{}", self.base_url, sku);

        let mut last_status = 0u16;
        for attempt in 0..self.max_retries.max(1) {
            self.limiter.until_ready().await;

            let response = self
                .http
                .get(&url)
                .header("X-API-KEY", &self.api_key)
                .send()
                .await?;

            let status = response.status();
            last_status = status.as_u16();

            if status.as_u16() == 404 {
                return Err(CatalogError::ProductNotFound(sku));
            }

            if status.as_u16() == 420 || status.as_u16() == 429 {
                warn!(attempt, status = last_status, "catalog rate-limited us, backing off");
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }

            if !status.is_success() {
                return Err(CatalogError::UnexpectedStatus(last_status));
            }

            let body: ProductResponse = response.json().await?;
            return Ok(Product {
                sku: body.sku,
                name: body.name,
                price: body.price,
            });
        }

        let _ = last_status;
        Err(CatalogError::MaxRetriesReached(self.max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_construction_rejects_nothing_for_sane_config() {
        let client = CatalogClient::new(
            "http://localhost:8090".to_string(),
            "token".to_string(),
            Duration::from_secs(3),
            10,
            20,
            3,
        );
        assert!(client.is_ok());
    }
}
