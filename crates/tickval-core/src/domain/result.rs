use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{Exchange, Ticker};

/// Storage key for one ticker's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub exchange: Exchange,
    pub ticker: Ticker,
}

impl ResultKey {
    pub fn new(exchange: Exchange, ticker: Ticker) -> Self {
        Self { exchange, ticker }
    }

    /// Stable idempotency key, identical across runs and processes.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.exchange, self.ticker)
    }
}

impl Display for ResultKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.ticker)
    }
}

/// Outcome of analyzing one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub exchange: Exchange,
    pub ticker: Ticker,
    pub success: bool,
    /// Valuation payload; opaque to the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 UTC timestamp.
    pub analyzed_at: String,
}

impl AnalysisResult {
    pub fn succeeded(key: &ResultKey, payload: Value) -> Self {
        Self {
            exchange: key.exchange.clone(),
            ticker: key.ticker.clone(),
            success: true,
            payload: Some(payload),
            error: None,
            analyzed_at: now_rfc3339(),
        }
    }

    pub fn failed(key: &ResultKey, error: impl Into<String>) -> Self {
        Self {
            exchange: key.exchange.clone(),
            ticker: key.ticker.clone(),
            success: false,
            payload: None,
            error: Some(error.into()),
            analyzed_at: now_rfc3339(),
        }
    }

    pub fn key(&self) -> ResultKey {
        ResultKey::new(self.exchange.clone(), self.ticker.clone())
    }
}

/// Current UTC time formatted as RFC 3339.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
