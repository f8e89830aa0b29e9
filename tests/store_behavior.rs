//! Behavior-driven tests for result stores
//!
//! These tests verify how results are written, read back and listed for resume across
//! the DuckDB file backend and the cloud table backend, and how the resilient facade
//! separates transient failures from fatal ones.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tickval_core::{
    AnalysisResult, BackendKind, CloudTableBackend, CloudTableConfig, DeploymentEnv, Exchange,
    HttpClient, HttpError, HttpFuture, HttpMethod, HttpRequest, HttpResponse, LocalFileBackend,
    ResilientStore, ResultKey, RetryPolicy, StoreErrorKind, Ticker, WarehouseConfig,
};

// =============================================================================
// Test doubles
// =============================================================================

/// HTTP client replaying scripted responses and recording every request.
#[derive(Default)]
struct RecordingHttpClient {
    responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl RecordingHttpClient {
    fn replying(responses: impl IntoIterator<Item = Result<HttpResponse, HttpError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

impl HttpClient for RecordingHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("requests").push(request);
            self.responses
                .lock()
                .expect("responses")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "script exhausted")))
        })
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(4),
        jitter_max: Duration::ZERO,
        jitter_seed: None,
    }
}

fn key(exchange: &str, ticker: &str) -> ResultKey {
    ResultKey::new(
        Exchange::parse(exchange).expect("exchange"),
        Ticker::parse(ticker).expect("ticker"),
    )
}

fn cloud_store(client: Arc<RecordingHttpClient>, max_attempts: u32) -> ResilientStore {
    let config = CloudTableConfig::new("https://project.example.co/", "service-key");
    let backend = CloudTableBackend::with_http_client(config, client);
    ResilientStore::new(Arc::new(backend), fast_retry(max_attempts))
}

// =============================================================================
// Local File Store: DuckDB
// =============================================================================

#[tokio::test]
async fn when_the_same_result_is_upserted_twice_it_is_stored_once() {
    // Given: A DuckDB-backed store in a temporary directory
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = LocalFileBackend::open(WarehouseConfig::in_dir(dir.path())).expect("open");
    let store = ResilientStore::new(Arc::new(backend), fast_retry(3));
    let key = key("NYSE", "KO");
    let result = AnalysisResult::succeeded(&key, json!({ "fair_value": 61.2, "currency": "USD" }));

    // When: The result is written twice
    store.upsert(&key, &result).await.expect("first upsert");
    store.upsert(&key, &result).await.expect("replayed upsert");

    // Then: Reading returns it unchanged and the ticker is listed once
    let stored = store.get(&key).await.expect("get").expect("stored result");
    assert_eq!(stored, result);
    let completed = store.list_completed(&key.exchange).await.expect("list");
    assert_eq!(completed.len(), 1);
    assert!(completed.contains(&key.ticker));
}

#[tokio::test]
async fn when_a_failed_result_is_replaced_by_a_success_the_ticker_becomes_completed() {
    // Given: A ticker whose first attempt failed
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = LocalFileBackend::open(WarehouseConfig::in_dir(dir.path())).expect("open");
    let store = ResilientStore::new(Arc::new(backend), fast_retry(3));
    let key = key("LSE", "VOD");
    store
        .upsert(&key, &AnalysisResult::failed(&key, "valuation service timed out"))
        .await
        .expect("failed upsert");
    assert!(store
        .list_completed(&key.exchange)
        .await
        .expect("list")
        .is_empty());

    // When: A later run succeeds for the same ticker
    let success = AnalysisResult::succeeded(&key, json!({ "fair_value": 0.8 }));
    store.upsert(&key, &success).await.expect("success upsert");

    // Then: The success overwrites the failure
    assert_eq!(store.get(&key).await.expect("get"), Some(success));
    assert_eq!(store.list_completed(&key.exchange).await.expect("list").len(), 1);
}

#[tokio::test]
async fn when_results_span_exchanges_resume_lists_only_the_requested_exchange() {
    let store = ResilientStore::in_memory(fast_retry(2));
    for (exchange, ticker) in [("NYSE", "IBM"), ("NASDAQ", "AAPL"), ("NYSE", "KO")] {
        let key = key(exchange, ticker);
        store
            .upsert(&key, &AnalysisResult::succeeded(&key, json!({})))
            .await
            .expect("upsert");
    }

    let completed = store
        .list_completed(&Exchange::parse("nyse").expect("exchange"))
        .await
        .expect("list");

    let tickers: Vec<&str> = completed.iter().map(Ticker::as_str).collect();
    assert_eq!(tickers, vec!["IBM", "KO"]);
}

#[tokio::test]
async fn when_a_result_is_written_under_the_wrong_key_it_is_rejected_without_retry() {
    let store = ResilientStore::in_memory(fast_retry(3));
    let result = AnalysisResult::succeeded(&key("NYSE", "IBM"), json!({}));

    let error = store
        .upsert(&key("NYSE", "KO"), &result)
        .await
        .expect_err("mismatched key");

    assert_eq!(error.attempts(), 0);
    assert_eq!(error.source_error().kind(), StoreErrorKind::MalformedRecord);
}

// =============================================================================
// Cloud Table Store: Wire Format
// =============================================================================

#[tokio::test]
async fn when_upserting_to_the_cloud_table_the_request_merges_on_the_natural_key() {
    // Given: A cloud table that acknowledges writes
    let client = Arc::new(RecordingHttpClient::replying([Ok(HttpResponse::new(201, ""))]));
    let store = cloud_store(client.clone(), 3);
    let key = key("NYSE", "IBM");
    let result = AnalysisResult::succeeded(&key, json!({ "fair_value": 182.5 }));

    // When: The result is upserted
    store.upsert(&key, &result).await.expect("upsert");

    // Then: One POST carries auth, merge semantics and the row body
    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(
        request.url,
        "https://project.example.co/rest/v1/analysis_results?on_conflict=exchange,ticker"
    );
    assert_eq!(request.headers.get("apikey").map(String::as_str), Some("service-key"));
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer service-key")
    );
    assert_eq!(
        request.headers.get("prefer").map(String::as_str),
        Some("resolution=merge-duplicates,return=minimal")
    );

    let body: Value =
        serde_json::from_str(request.body.as_deref().expect("body")).expect("json body");
    assert_eq!(body[0]["exchange"], "NYSE");
    assert_eq!(body[0]["ticker"], "IBM");
    assert_eq!(body[0]["success"], true);
    assert_eq!(body[0]["payload"]["fair_value"], 182.5);
}

#[tokio::test]
async fn when_reading_from_the_cloud_table_rows_become_results() {
    // Given: A table returning one stored row
    let row = json!([{
        "exchange": "NYSE",
        "ticker": "IBM",
        "success": true,
        "payload": { "fair_value": 182.5 },
        "error": null,
        "analyzed_at": "2026-10-16T09:30:00Z"
    }]);
    let client = Arc::new(RecordingHttpClient::replying([Ok(HttpResponse::new(
        200,
        row.to_string(),
    ))]));
    let store = cloud_store(client.clone(), 3);

    // When: The result is fetched
    let stored = store
        .get(&key("NYSE", "IBM"))
        .await
        .expect("get")
        .expect("row present");

    // Then: The row is decoded and the query filters on both key columns
    assert!(stored.success);
    assert_eq!(stored.payload, Some(json!({ "fair_value": 182.5 })));
    assert_eq!(stored.analyzed_at, "2026-10-16T09:30:00Z");
    let url = &client.requests()[0].url;
    assert!(url.contains("exchange=eq.NYSE"));
    assert!(url.contains("ticker=eq.IBM"));
    assert!(url.contains("limit=1"));
}

#[tokio::test]
async fn when_listing_completed_tickers_only_successes_are_requested() {
    let client = Arc::new(RecordingHttpClient::replying([
        Ok(HttpResponse::new(200, r#"[{"ticker":"IBM"},{"ticker":"KO"}]"#)),
        Ok(HttpResponse::new(200, "[]")),
    ]));
    let store = cloud_store(client.clone(), 3);

    let completed = store
        .list_completed(&Exchange::parse("NYSE").expect("exchange"))
        .await
        .expect("list");

    assert_eq!(completed.len(), 2);
    let requests = client.requests();
    assert!(requests[0].url.contains("success=is.true"));
    assert!(requests[0].url.contains("order=ticker.asc"));
    assert!(requests[1].url.contains("offset=2"));
}

/// Table server holding `rows` completed tickers that never returns more than `max_rows`
/// per response, whatever `limit` asks for.
struct CappedTableServer {
    rows: Vec<String>,
    max_rows: usize,
    calls: AtomicUsize,
}

impl CappedTableServer {
    fn new(count: usize, max_rows: usize) -> Self {
        Self {
            rows: (0..count).map(|i| format!("T{i:04}")).collect(),
            max_rows,
            calls: AtomicUsize::new(0),
        }
    }
}

fn query_param(url: &str, name: &str) -> Option<usize> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
        .and_then(|value| value.parse().ok())
}

impl HttpClient for CappedTableServer {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let offset = query_param(&request.url, "offset").unwrap_or(0);
            let limit = query_param(&request.url, "limit").unwrap_or(usize::MAX);
            let page: Vec<Value> = self
                .rows
                .iter()
                .skip(offset)
                .take(limit.min(self.max_rows))
                .map(|ticker| json!({ "ticker": ticker }))
                .collect();
            Ok(HttpResponse::new(200, Value::Array(page).to_string()))
        })
    }
}

#[tokio::test]
async fn when_completed_tickers_exceed_the_server_row_cap_every_page_is_read() {
    // Given: 2500 completed tickers behind a server capping responses at 1000 rows
    let server = Arc::new(CappedTableServer::new(2_500, 1_000));
    let backend = CloudTableBackend::with_http_client(
        CloudTableConfig::new("https://project.example.co", "service-key"),
        server.clone(),
    );
    let store = ResilientStore::new(Arc::new(backend), fast_retry(3));

    // When: Completed tickers are listed for resume
    let completed = store
        .list_completed(&Exchange::parse("NYSE").expect("exchange"))
        .await
        .expect("list");

    // Then: All of them come back, across pages
    assert_eq!(completed.len(), 2_500);
    assert!(completed.contains(&Ticker::parse("T2499").expect("ticker")));
    assert_eq!(server.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn when_the_server_cap_is_below_the_page_size_paging_still_completes() {
    // Given: A page size larger than what the server will return per response
    let server = Arc::new(CappedTableServer::new(250, 100));
    let backend = CloudTableBackend::with_http_client(
        CloudTableConfig::new("https://project.example.co", "service-key").with_page_size(1_000),
        server.clone(),
    );
    let store = ResilientStore::new(Arc::new(backend), fast_retry(3));

    // When: Completed tickers are listed
    let completed = store
        .list_completed(&Exchange::parse("NYSE").expect("exchange"))
        .await
        .expect("list");

    // Then: Short pages do not end the listing early
    assert_eq!(completed.len(), 250);
}

// =============================================================================
// Resilient Store: Retry Classification
// =============================================================================

#[tokio::test]
async fn when_the_cloud_table_throttles_the_write_is_retried() {
    // Given: Two throttled responses followed by success
    let client = Arc::new(RecordingHttpClient::replying([
        Ok(HttpResponse::new(429, "slow down")),
        Ok(HttpResponse::new(503, "maintenance")),
        Ok(HttpResponse::new(201, "")),
    ]));
    let store = cloud_store(client.clone(), 4);
    let key = key("NYSE", "IBM");

    // When: A result is upserted
    store
        .upsert(&key, &AnalysisResult::failed(&key, "not found"))
        .await
        .expect("third attempt succeeds");

    // Then: All three requests were sent
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn when_the_cloud_table_rejects_credentials_the_error_is_not_retried() {
    // Given: A table rejecting the API key
    let client = Arc::new(RecordingHttpClient::replying([Ok(HttpResponse::new(
        401,
        "invalid api key",
    ))]));
    let store = cloud_store(client.clone(), 4);

    // When: The store is pinged
    let error = store.ping().await.expect_err("unauthorized");

    // Then: It fails after one attempt with an unauthorized error
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(!error.is_exhausted());
    assert_eq!(error.source_error().kind(), StoreErrorKind::Unauthorized);
    assert_eq!(error.source_error().code(), "store.unauthorized");
}

#[tokio::test]
async fn when_transient_failures_outlast_the_budget_the_error_reports_exhaustion() {
    let client = Arc::new(RecordingHttpClient::replying([
        Err(HttpError::timeout("read timed out")),
        Err(HttpError::connect("connection reset")),
        Err(HttpError::timeout("read timed out")),
    ]));
    let store = cloud_store(client.clone(), 3);

    let error = store.ping().await.expect_err("exhausted");

    assert!(error.is_exhausted());
    assert_eq!(error.attempts(), 3);
    assert_eq!(error.source_error().kind(), StoreErrorKind::Timeout);
}

// =============================================================================
// Backend Selection
// =============================================================================

#[test]
fn deployment_environment_selects_the_default_backend() {
    assert_eq!(
        BackendKind::for_env(DeploymentEnv::Production),
        BackendKind::CloudTable
    );
    assert_eq!(
        BackendKind::for_env(DeploymentEnv::Development),
        BackendKind::LocalFile
    );
    assert_eq!(
        BackendKind::for_env(DeploymentEnv::Test),
        BackendKind::LocalFile
    );
}

#[test]
fn explicit_backend_overrides_the_deployment_default() {
    let kind = BackendKind::from_lookup(|name: &str| match name {
        "TICKVAL_ENV" => Some(String::from("production")),
        "TICKVAL_STORE_BACKEND" => Some(String::from("local")),
        _ => None,
    })
    .expect("backend");

    assert_eq!(kind, BackendKind::LocalFile);
}
