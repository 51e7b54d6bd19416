//! Offset/limit review crawler for the JSON review endpoint.

use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use tracing::{info, warn};

use crate::core::config::RestConfig;
use crate::core::error::{HarvestError, HarvestResult};
use crate::core::types::{RestPage, ReviewRecord};
use crate::features::antibot::RequestDelay;

/// One page request against the review endpoint.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    async fn fetch_page(
        &self,
        product_id: &str,
        offset: u64,
        limit: u32,
        referer: &str,
    ) -> HarvestResult<RestPage>;
}

/// reqwest-backed endpoint client with bounded exponential-backoff retries.
pub struct HttpReviewApi {
    client: reqwest::Client,
    cfg: RestConfig,
}

impl HttpReviewApi {
    pub fn new(cfg: RestConfig) -> HarvestResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &cfg.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!("ignoring invalid header {}: {}", name, value),
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self { client, cfg })
    }

    fn request_url(&self, product_id: &str, offset: u64, limit: u32) -> HarvestResult<url::Url> {
        let params: [(&str, String); 10] = [
            (self.cfg.product_param.as_str(), product_id.to_string()),
            ("offset", offset.to_string()),
            ("prodReviewUnit", "OnlineProd".to_string()),
            ("prodReviewType", "All".to_string()),
            ("prodReviewSort", "Last".to_string()),
            ("scope", "All".to_string()),
            ("opinion", String::new()),
            ("filterMemberAttrYn", "N".to_string()),
            ("limit", limit.to_string()),
            ("imageOnlyYn", "N".to_string()),
        ];
        url::Url::parse_with_params(&self.cfg.api_url, &params)
            .map_err(|e| HarvestError::Config(format!("invalid api_url {}: {}", self.cfg.api_url, e)))
    }
}

#[async_trait]
impl ReviewApi for HttpReviewApi {
    async fn fetch_page(
        &self,
        product_id: &str,
        offset: u64,
        limit: u32,
        referer: &str,
    ) -> HarvestResult<RestPage> {
        let url = self.request_url(product_id, offset, limit)?;
        let cfg = &self.cfg;
        let client = &self.client;
        let max_attempts = cfg.max_retries + 1;
        let mut attempt = 0u32;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(cfg.retry_base_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(None)
            .build();

        retry(policy, || {
            attempt += 1;
            let n = attempt;
            let request = client.get(url.clone()).header(REFERER, referer);
            async move {
                let give_up = n >= max_attempts;
                match request.send().await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if resp.status().is_success() {
                            let body = resp
                                .text()
                                .await
                                .map_err(|e| backoff::Error::permanent(HarvestError::from(e)))?;
                            return serde_json::from_str::<RestPage>(&body)
                                .map_err(|e| backoff::Error::permanent(HarvestError::from(e)));
                        }
                        if !cfg.retry_statuses.contains(&status) {
                            return Err(backoff::Error::permanent(HarvestError::Http { status }));
                        }
                        if give_up {
                            return Err(backoff::Error::permanent(HarvestError::RetriesExhausted {
                                attempts: n,
                                last_status: Some(status),
                            }));
                        }
                        warn!("🔁 status {} at offset {}, retrying (attempt {}/{})", status, offset, n, max_attempts);
                        Err(backoff::Error::transient(HarvestError::Http { status }))
                    }
                    Err(e) if e.is_timeout() || e.is_connect() => {
                        if give_up {
                            return Err(backoff::Error::permanent(HarvestError::RetriesExhausted {
                                attempts: n,
                                last_status: None,
                            }));
                        }
                        warn!("🔁 transport error at offset {}: {} (attempt {}/{})", offset, e, n, max_attempts);
                        Err(backoff::Error::transient(HarvestError::Transport(e)))
                    }
                    Err(e) => Err(backoff::Error::permanent(HarvestError::Transport(e))),
                }
            }
        })
        .await
    }
}

/// Everything fetched for one product.
#[derive(Debug, Default)]
pub struct RestFetch {
    /// Items in request order, never re-sorted.
    pub reviews: Vec<ReviewRecord>,
    pub total_count: Option<u64>,
    pub requests: u32,
    /// Set when a request failed for good; `reviews` keeps what came before.
    pub aborted: Option<String>,
}

/// Walk the listing from offset 0 until an empty page or `offset >= total`.
pub async fn fetch_reviews(
    api: &dyn ReviewApi,
    product_id: &str,
    referer: &str,
    limit: u32,
    page_delay: RequestDelay,
) -> RestFetch {
    let mut out = RestFetch::default();
    let mut offset: u64 = 0;
    let limit = limit.max(1);

    info!("🚀 Starting crawl for product {}", product_id);

    loop {
        out.requests += 1;
        let page = match api.fetch_page(product_id, offset, limit, referer).await {
            Ok(page) => page,
            Err(e) => {
                warn!("❌ Request at offset {} failed: {}", offset, e);
                out.aborted = Some(e.to_string());
                break;
            }
        };

        let total = *out.total_count.get_or_insert_with(|| {
            info!("📊 Total reviews available: {}", page.total_count);
            page.total_count
        });

        if page.prod_review_list.is_empty() {
            info!("No more reviews returned");
            break;
        }

        let fetched = page.prod_review_list.len();
        out.reviews.extend(page.prod_review_list);
        info!("Fetched {} reviews. Progress: {}/{}", fetched, out.reviews.len(), total);

        offset += u64::from(limit);
        if offset >= total {
            break;
        }

        page_delay.pause().await;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves `total` numbered items, optionally failing at one offset.
    struct ScriptedApi {
        total: u64,
        fail_at: Option<u64>,
        offsets: Mutex<Vec<u64>>,
    }

    impl ScriptedApi {
        fn new(total: u64) -> Self {
            Self { total, fail_at: None, offsets: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ReviewApi for ScriptedApi {
        async fn fetch_page(&self, _: &str, offset: u64, limit: u32, _: &str) -> HarvestResult<RestPage> {
            self.offsets.lock().unwrap().push(offset);
            if self.fail_at == Some(offset) {
                return Err(HarvestError::Http { status: 403 });
            }
            let end = (offset + u64::from(limit)).min(self.total);
            Ok(RestPage {
                total_count: self.total,
                prod_review_list: (offset..end).map(|i| json!({"prodReviewSn": i})).collect(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn walks_offsets_until_total() {
        let api = ScriptedApi::new(25);
        let fetch = fetch_reviews(&api, "1", "https://ref", 10, RequestDelay::new(1000, 3000)).await;

        assert_eq!(*api.offsets.lock().unwrap(), vec![0, 10, 20]);
        assert_eq!(fetch.requests, 3);
        assert_eq!(fetch.total_count, Some(25));
        assert!(fetch.aborted.is_none());
        let sns: Vec<u64> = fetch.reviews.iter().map(|r| r["prodReviewSn"].as_u64().unwrap()).collect();
        assert_eq!(sns, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_listing_stops_after_one_request() {
        let api = ScriptedApi::new(0);
        let fetch = fetch_reviews(&api, "1", "r", 10, RequestDelay::none()).await;
        assert_eq!(fetch.requests, 1);
        assert!(fetch.reviews.is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_partial_results() {
        let mut api = ScriptedApi::new(50);
        api.fail_at = Some(20);
        let fetch = fetch_reviews(&api, "1", "r", 10, RequestDelay::none()).await;
        assert_eq!(fetch.reviews.len(), 20);
        assert!(fetch.aborted.unwrap().contains("403"));
    }

    #[test]
    fn request_url_carries_listing_params() {
        let api = HttpReviewApi::new(RestConfig::default()).unwrap();
        let url = api.request_url("12345", 20, 10).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("onlineProdSn".into(), "12345".into())));
        assert!(pairs.contains(&("offset".into(), "20".into())));
        assert!(pairs.contains(&("limit".into(), "10".into())));
        assert!(pairs.contains(&("prodReviewSort".into(), "Last".into())));
        assert!(pairs.contains(&("scope".into(), "All".into())));
        assert!(pairs.contains(&("opinion".into(), String::new())));
    }
}
