use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BackendKind, StoreBackend, StoreError, StoreFuture};
use crate::config::env_var;
use crate::domain::{AnalysisResult, Exchange, ResultKey, Ticker};
use crate::http_client::{
    is_retryable_status, HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
use crate::ConfigError;

pub const ENV_CLOUD_URL: &str = "TICKVAL_CLOUD_URL";
pub const ENV_CLOUD_API_KEY: &str = "TICKVAL_CLOUD_API_KEY";
pub const ENV_CLOUD_TABLE: &str = "TICKVAL_CLOUD_TABLE";

const DEFAULT_TABLE: &str = "analysis_results";
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Connection settings for the managed results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTableConfig {
    /// Project URL, e.g. `https://project.example.co`.
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout: Duration,
    /// Rows requested per page when listing; the server may return fewer.
    pub page_size: usize,
}

impl CloudTableConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: String::from(DEFAULT_TABLE),
            timeout: Duration::from_secs(10),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// A page size of zero is raised to one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_CLOUD_URL).ok_or(ConfigError::MissingEnv {
            name: ENV_CLOUD_URL,
        })?;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidEnv {
                name: ENV_CLOUD_URL,
                value: base_url,
            });
        }
        let api_key = lookup(ENV_CLOUD_API_KEY).ok_or(ConfigError::MissingEnv {
            name: ENV_CLOUD_API_KEY,
        })?;

        let config = Self::new(base_url, api_key);
        Ok(match lookup(ENV_CLOUD_TABLE) {
            Some(table) => config.with_table(table),
            None => config,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

/// Production store: a REST-exposed Postgres table (PostgREST dialect).
///
/// Reads may lag behind acknowledged writes; callers must not rely on read-after-write.
#[derive(Clone)]
pub struct CloudTableBackend {
    config: CloudTableConfig,
    http_client: Arc<dyn HttpClient>,
}

impl CloudTableBackend {
    pub fn new(config: CloudTableConfig) -> Self {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(config: CloudTableConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &CloudTableConfig {
        &self.config
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        request
            .with_header("apikey", &self.config.api_key)
            .with_header("authorization", format!("Bearer {}", self.config.api_key))
            .with_header("accept", "application/json")
            .with_timeout(self.config.timeout)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
        let response = self
            .http_client
            .execute(self.authorize(request))
            .await
            .map_err(classify_transport_error)?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_status(&response))
        }
    }

    async fn select<T>(&self, query: String) -> Result<Vec<T>, StoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}?{query}", self.config.table_url());
        let response = self.send(HttpRequest::get(url)).await?;
        serde_json::from_str(&response.body).map_err(|error| {
            StoreError::malformed_record(format!("cloud table returned invalid JSON: {error}"))
        })
    }
}

impl StoreBackend for CloudTableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudTable
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.select::<TickerRow>(String::from("select=ticker&limit=1"))
                .await
                .map(|_| ())
        })
    }

    fn get<'a>(&'a self, key: &'a ResultKey) -> StoreFuture<'a, Option<AnalysisResult>> {
        Box::pin(async move {
            let query = format!(
                "select=*&exchange=eq.{}&ticker=eq.{}&limit=1",
                urlencoding::encode(key.exchange.as_str()),
                urlencoding::encode(key.ticker.as_str()),
            );
            let rows = self.select::<CloudRow>(query).await?;
            rows.into_iter().next().map(CloudRow::into_result).transpose()
        })
    }

    fn upsert<'a>(&'a self, result: &'a AnalysisResult) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if result.success && result.payload.is_none() {
                return Err(StoreError::malformed_record(format!(
                    "successful result for {} has no payload",
                    result.key()
                )));
            }

            let body = serde_json::to_string(&[CloudRow::from_result(result)]).map_err(|error| {
                StoreError::malformed_record(format!("result is not serializable: {error}"))
            })?;
            let url = format!("{}?on_conflict=exchange,ticker", self.config.table_url());
            let request = HttpRequest::post_json(url, body)
                .with_header("prefer", "resolution=merge-duplicates,return=minimal");

            self.send(request).await.map(|_| ())
        })
    }

    fn list_completed<'a>(&'a self, exchange: &'a Exchange) -> StoreFuture<'a, BTreeSet<Ticker>> {
        Box::pin(async move {
            // Servers cap rows per response, possibly below `page_size`, so paging
            // stops only on an empty page.
            let mut completed = BTreeSet::new();
            let mut offset = 0;
            loop {
                let query = format!(
                    "select=ticker&exchange=eq.{}&success=is.true&order=ticker.asc&limit={}&offset={offset}",
                    urlencoding::encode(exchange.as_str()),
                    self.config.page_size,
                );
                let rows = self.select::<TickerRow>(query).await?;
                if rows.is_empty() {
                    break;
                }
                offset += rows.len();
                for row in rows {
                    let ticker = Ticker::parse(&row.ticker).map_err(|error| {
                        StoreError::malformed_record(format!(
                            "stored ticker '{}': {error}",
                            row.ticker
                        ))
                    })?;
                    completed.insert(ticker);
                }
            }
            Ok(completed)
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CloudRow {
    exchange: String,
    ticker: String,
    success: bool,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    analyzed_at: String,
}

impl CloudRow {
    fn from_result(result: &AnalysisResult) -> Self {
        Self {
            exchange: result.exchange.to_string(),
            ticker: result.ticker.to_string(),
            success: result.success,
            payload: result.payload.clone(),
            error: result.error.clone(),
            analyzed_at: result.analyzed_at.clone(),
        }
    }

    fn into_result(self) -> Result<AnalysisResult, StoreError> {
        let exchange = Exchange::parse(&self.exchange).map_err(|error| {
            StoreError::malformed_record(format!("stored exchange '{}': {error}", self.exchange))
        })?;
        let ticker = Ticker::parse(&self.ticker).map_err(|error| {
            StoreError::malformed_record(format!("stored ticker '{}': {error}", self.ticker))
        })?;

        Ok(AnalysisResult {
            exchange,
            ticker,
            success: self.success,
            payload: self.payload,
            error: self.error,
            analyzed_at: self.analyzed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TickerRow {
    ticker: String,
}

fn classify_transport_error(error: HttpError) -> StoreError {
    let message = format!("cloud table transport error: {}", error.message());
    match (error.kind(), error.retryable()) {
        (_, false) => StoreError::internal(message),
        (HttpErrorKind::Timeout, true) => StoreError::timeout(message),
        (HttpErrorKind::Connect, true) => StoreError::connection(message),
        (HttpErrorKind::Other, true) => StoreError::unavailable(message),
    }
}

fn classify_status(response: &HttpResponse) -> StoreError {
    let message = format!(
        "cloud table returned status {}: {}",
        response.status,
        response.body.chars().take(200).collect::<String>()
    );
    match response.status {
        401 | 403 => StoreError::unauthorized(message),
        408 => StoreError::timeout(message),
        429 => StoreError::throttled(message),
        status if is_retryable_status(status) => StoreError::unavailable(message),
        500..=599 => StoreError::internal(message),
        _ => StoreError::malformed_record(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_url_and_key() {
        let missing = CloudTableConfig::from_lookup(|_: &str| None).expect_err("must fail");
        assert_eq!(missing, ConfigError::MissingEnv { name: ENV_CLOUD_URL });

        let config = CloudTableConfig::from_lookup(|name: &str| match name {
            ENV_CLOUD_URL => Some(String::from("https://project.example.co/")),
            ENV_CLOUD_API_KEY => Some(String::from("service-key")),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.table_url(), "https://project.example.co/rest/v1/analysis_results");
    }

    #[test]
    fn status_classification_separates_transient_from_fatal() {
        let classify = |status| classify_status(&HttpResponse::new(status, "{}"));

        assert!(classify(429).retryable());
        assert!(classify(503).retryable());
        assert!(!classify(401).retryable());
        assert!(!classify(409).retryable());
        assert_eq!(classify(501).code(), "store.internal");
    }

    #[test]
    fn transport_timeouts_stay_retryable() {
        assert_eq!(
            classify_transport_error(HttpError::timeout("deadline")).code(),
            "store.timeout"
        );
        assert!(!classify_transport_error(HttpError::non_retryable("bad url")).retryable());
    }
}
