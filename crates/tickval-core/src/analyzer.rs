//! The external valuation collaborator.
//!
//! The orchestrator treats analysis as one opaque call per ticker. [`HttpAnalyzer`] is
//! the production implementation talking to the valuation service; tests plug in their
//! own [`Analyzer`].

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::env_var;
use crate::domain::{Exchange, Ticker};
use crate::http_client::{
    is_retryable_status, HttpAuth, HttpClient, HttpErrorKind, HttpRequest, ReqwestHttpClient,
};
use crate::progress::ProgressTracker;
use crate::ConfigError;

pub const ENV_ANALYZER_URL: &str = "TICKVAL_ANALYZER_URL";
pub const ENV_ANALYZER_TOKEN: &str = "TICKVAL_ANALYZER_TOKEN";

/// Everything an analyzer gets for one ticker.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeContext<'a> {
    pub exchange: &'a Exchange,
    pub ticker: &'a Ticker,
    /// Per-ticker deadline the analyzer should honour, if configured.
    pub timeout: Option<Duration>,
    /// Step reporter for this ticker.
    pub progress: &'a ProgressTracker,
    /// 1-based attempt number; above 1 only when whole-ticker retry is enabled.
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeErrorKind {
    NotFound,
    MalformedResponse,
    Unauthorized,
    Unavailable,
    Timeout,
    RateLimited,
    Cancelled,
    Internal,
}

/// Structured analysis failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeError {
    kind: AnalyzeErrorKind,
    message: String,
    retryable: bool,
}

impl AnalyzeError {
    fn with_kind(kind: AnalyzeErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::NotFound, message, false)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::MalformedResponse, message, false)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::Unauthorized, message, false)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::Unavailable, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::Timeout, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::RateLimited, message, true)
    }

    pub fn cancelled() -> Self {
        Self::with_kind(AnalyzeErrorKind::Cancelled, "cancelled", false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(AnalyzeErrorKind::Internal, message, false)
    }

    pub const fn kind(&self) -> AnalyzeErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            AnalyzeErrorKind::NotFound => "analyze.not_found",
            AnalyzeErrorKind::MalformedResponse => "analyze.malformed_response",
            AnalyzeErrorKind::Unauthorized => "analyze.unauthorized",
            AnalyzeErrorKind::Unavailable => "analyze.unavailable",
            AnalyzeErrorKind::Timeout => "analyze.timeout",
            AnalyzeErrorKind::RateLimited => "analyze.rate_limited",
            AnalyzeErrorKind::Cancelled => "analyze.cancelled",
            AnalyzeErrorKind::Internal => "analyze.internal",
        }
    }
}

impl Display for AnalyzeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for AnalyzeError {}

pub type AnalyzeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, AnalyzeError>> + Send + 'a>>;

/// Produces the valuation payload for one ticker.
pub trait Analyzer: Send + Sync {
    fn analyze<'a>(&'a self, ctx: AnalyzeContext<'a>) -> AnalyzeFuture<'a>;
}

/// Client for the valuation service's `GET /analyze/{exchange}/{ticker}` endpoint.
#[derive(Clone)]
pub struct HttpAnalyzer {
    base_url: String,
    auth: HttpAuth,
    http_client: Arc<dyn HttpClient>,
}

impl HttpAnalyzer {
    pub fn new(base_url: impl Into<String>, auth: HttpAuth) -> Self {
        Self::with_http_client(base_url, auth, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(
        base_url: impl Into<String>,
        auth: HttpAuth,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            http_client,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_ANALYZER_URL).ok_or(ConfigError::MissingEnv {
            name: ENV_ANALYZER_URL,
        })?;
        let auth = lookup(ENV_ANALYZER_TOKEN).map_or(HttpAuth::None, HttpAuth::BearerToken);
        Ok(Self::new(base_url, auth))
    }

    fn endpoint(&self, exchange: &Exchange, ticker: &Ticker) -> String {
        format!(
            "{}/analyze/{}/{}",
            self.base_url,
            urlencoding::encode(exchange.as_str()),
            urlencoding::encode(ticker.as_str())
        )
    }
}

impl Analyzer for HttpAnalyzer {
    fn analyze<'a>(&'a self, ctx: AnalyzeContext<'a>) -> AnalyzeFuture<'a> {
        Box::pin(async move {
            let mut request = HttpRequest::get(self.endpoint(ctx.exchange, ctx.ticker))
                .with_auth(&self.auth)
                .with_header("accept", "application/json");
            if let Some(timeout) = ctx.timeout {
                request = request.with_timeout(timeout);
            }

            ctx.progress.step("request valuation");
            let response = self.http_client.execute(request).await.map_err(|error| {
                let message = format!("valuation service transport error: {}", error.message());
                match (error.kind(), error.retryable()) {
                    (_, false) => AnalyzeError::internal(message),
                    (HttpErrorKind::Timeout, true) => AnalyzeError::timeout(message),
                    (_, true) => AnalyzeError::unavailable(message),
                }
            })?;
            ctx.progress.step("receive valuation");

            if !response.is_success() {
                let message = format!(
                    "valuation service returned status {} for {}:{}",
                    response.status, ctx.exchange, ctx.ticker
                );
                return Err(match response.status {
                    404 => AnalyzeError::not_found(message),
                    401 | 403 => AnalyzeError::unauthorized(message),
                    408 => AnalyzeError::timeout(message),
                    429 => AnalyzeError::rate_limited(message),
                    status if is_retryable_status(status) => AnalyzeError::unavailable(message),
                    _ => AnalyzeError::malformed_response(message),
                });
            }

            let payload: Value = serde_json::from_str(&response.body).map_err(|error| {
                AnalyzeError::malformed_response(format!("valuation payload is not JSON: {error}"))
            })?;
            if !payload.is_object() {
                return Err(AnalyzeError::malformed_response(
                    "valuation payload must be a JSON object",
                ));
            }
            ctx.progress.step("parse valuation");

            Ok(payload)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpFuture, HttpResponse};
    use std::sync::Mutex;

    struct Scripted {
        response: Result<HttpResponse, HttpError>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for Scripted {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            self.seen.lock().expect("seen").push(request);
            let response = self.response.clone();
            Box::pin(async move { response })
        }
    }

    fn analyzer(response: Result<HttpResponse, HttpError>) -> (HttpAnalyzer, Arc<Scripted>) {
        let client = Arc::new(Scripted {
            response,
            seen: Mutex::new(Vec::new()),
        });
        let analyzer = HttpAnalyzer::with_http_client(
            "https://valuation.test/",
            HttpAuth::BearerToken(String::from("secret")),
            client.clone(),
        );
        (analyzer, client)
    }

    async fn run(analyzer: &HttpAnalyzer, progress: &ProgressTracker) -> Result<Value, AnalyzeError> {
        let exchange = Exchange::parse("NASDAQ").expect("exchange");
        let ticker = Ticker::parse("BRK.B").expect("ticker");
        analyzer
            .analyze(AnalyzeContext {
                exchange: &exchange,
                ticker: &ticker,
                timeout: Some(Duration::from_secs(3)),
                progress,
                attempt: 1,
            })
            .await
    }

    #[tokio::test]
    async fn successful_response_is_returned_as_payload() {
        let (analyzer, client) = analyzer(Ok(HttpResponse::ok_json(r#"{"dcf":{"value":101.5}}"#)));
        let progress = ProgressTracker::new(7);

        let payload = run(&analyzer, &progress).await.expect("payload");

        assert_eq!(payload["dcf"]["value"], 101.5);
        assert_eq!(progress.current_step(), 3);
        let seen = client.seen.lock().expect("seen");
        assert_eq!(seen[0].url, "https://valuation.test/analyze/NASDAQ/BRK.B");
        assert_eq!(seen[0].timeout_ms, 3_000);
        assert_eq!(
            seen[0].headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn not_found_is_fatal_and_throttling_is_retryable() {
        let progress = ProgressTracker::new(7);

        let (missing, _) = analyzer(Ok(HttpResponse::new(404, "{}")));
        let error = run(&missing, &progress).await.expect_err("404");
        assert_eq!(error.kind(), AnalyzeErrorKind::NotFound);
        assert!(!error.retryable());

        let (throttled, _) = analyzer(Ok(HttpResponse::new(429, "")));
        let error = run(&throttled, &progress).await.expect_err("429");
        assert_eq!(error.code(), "analyze.rate_limited");
        assert!(error.retryable());
    }

    #[tokio::test]
    async fn non_object_payload_is_malformed() {
        let (analyzer, _) = analyzer(Ok(HttpResponse::ok_json("[1,2,3]")));
        let progress = ProgressTracker::new(7);

        let error = run(&analyzer, &progress).await.expect_err("malformed");
        assert_eq!(error.kind(), AnalyzeErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn transport_timeout_maps_to_retryable_timeout() {
        let (analyzer, _) = analyzer(Err(HttpError::timeout("deadline elapsed")));
        let progress = ProgressTracker::new(7);

        let error = run(&analyzer, &progress).await.expect_err("timeout");
        assert_eq!(error.kind(), AnalyzeErrorKind::Timeout);
        assert!(error.retryable());
    }

    #[test]
    fn from_env_requires_service_url() {
        let error = HttpAnalyzer::from_lookup(|_: &str| None).err();
        assert_eq!(
            error,
            Some(ConfigError::MissingEnv {
                name: ENV_ANALYZER_URL
            })
        );
    }
}
