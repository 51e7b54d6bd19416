//! REST client behaviour against an in-process listing endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use review_harvester::core::config::{DelayRange, HarvestConfig, RestConfig};
use review_harvester::rest_crawl::{fetch_reviews, HttpReviewApi, ReviewApi};
use review_harvester::runner::run_rest_site;
use review_harvester::HarvestError;

#[derive(Clone)]
struct Endpoint {
    hits: Arc<AtomicU32>,
    /// Statuses returned for the first N hits before serving data.
    failures: Arc<Vec<u16>>,
    total: u64,
}

async fn reviews(
    State(ep): State<Endpoint>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let n = ep.hits.fetch_add(1, Ordering::SeqCst) as usize;
    if let Some(status) = ep.failures.get(n) {
        let code = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, "nope").into_response();
    }
    if !headers.contains_key("referer") {
        return (StatusCode::BAD_REQUEST, "missing referer").into_response();
    }

    let offset: u64 = q.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: u64 = q.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10);
    let product = q.get("onlineProdSn").cloned().unwrap_or_default();
    let list: Vec<_> = (offset..(offset + limit).min(ep.total))
        .map(|i| json!({ "prodReviewSn": i, "product": product, "prodReviewRegistDt": format!("2024-01-{:02}", i + 1) }))
        .collect();
    Json(json!({ "totalCount": ep.total, "prodReviewList": list })).into_response()
}

async fn serve(failures: Vec<u16>, total: u64) -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let ep = Endpoint {
        hits: hits.clone(),
        failures: Arc::new(failures),
        total,
    };
    let app = Router::new().route("/reviews", get(reviews)).with_state(ep);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/reviews", addr), hits)
}

fn fast_config(api_url: String) -> RestConfig {
    RestConfig {
        api_url,
        page_size: 4,
        timeout_secs: 5,
        max_retries: 2,
        retry_base_ms: 10,
        page_delay: DelayRange::fixed(0),
        product_delay: DelayRange::fixed(0),
        ..RestConfig::default()
    }
}

#[tokio::test]
async fn retryable_status_is_retried_until_success() {
    let (url, hits) = serve(vec![503, 429], 3).await;
    let api = HttpReviewApi::new(fast_config(url)).unwrap();

    let page = api.fetch_page("111", 0, 4, "https://shop.test/p?onlineProdSn=111").await.unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.prod_review_list.len(), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let (url, hits) = serve(vec![404], 3).await;
    let api = HttpReviewApi::new(fast_config(url)).unwrap();

    let err = api.fetch_page("111", 0, 4, "https://shop.test/").await.unwrap_err();
    assert!(matches!(err, HarvestError::Http { status: 404 }), "got {err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_run_out_after_configured_attempts() {
    let (url, hits) = serve(vec![503; 10], 3).await;
    let api = HttpReviewApi::new(fast_config(url)).unwrap();

    let err = api.fetch_page("111", 0, 4, "https://shop.test/").await.unwrap_err();
    match err {
        HarvestError::RetriesExhausted { attempts, last_status } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, Some(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn offset_loop_walks_every_page() {
    let (url, hits) = serve(vec![], 10).await;
    let api = HttpReviewApi::new(fast_config(url)).unwrap();

    let fetch = fetch_reviews(&api, "111", "https://shop.test/", 4, DelayRange::fixed(0).to_request_delay()).await;
    assert!(fetch.aborted.is_none());
    assert_eq!(fetch.total_count, Some(10));
    assert_eq!(fetch.reviews.len(), 10);
    // offsets 0, 4, 8
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rest_run_writes_one_snapshot_per_product() {
    let (url, _hits) = serve(vec![], 5).await;
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("targets.csv");
    std::fs::write(
        &input,
        "플랫폼,주소\n\
         AP몰,https://www.amoremall.com/kr/ko/product/detail?onlineProdSn=111\n\
         네이버,https://smartstore.naver.com/shop/products/999\n\
         AP몰,https://www.amoremall.com/kr/ko/product/detail?foo=bar\n",
    )
    .unwrap();

    let cfg = HarvestConfig {
        input_file: input,
        data_dir: dir.path().join("raw"),
        rest: fast_config(url),
        ..HarvestConfig::default()
    };
    let summary = run_rest_site(&cfg).await.unwrap();

    assert_eq!(summary.products_total, 2);
    assert_eq!(summary.products_completed, 1);
    assert_eq!(summary.new_reviews, 5);

    let file = summary.output_dir.join("apmall_reviews_111.json");
    let saved: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
    assert_eq!(saved.len(), 5);
    assert_eq!(saved[0]["product"], "111");
}
