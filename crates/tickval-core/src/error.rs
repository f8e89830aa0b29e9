use thiserror::Error;

use crate::store::StoreError;

/// Validation errors for caller-supplied identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,
    #[error("ticker length {len} exceeds max {max}")]
    TickerTooLong { len: usize, max: usize },
    #[error("ticker must start with an ASCII letter or digit: '{ch}'")]
    TickerInvalidStart { ch: char },
    #[error("ticker contains invalid character '{ch}' at index {index}")]
    TickerInvalidChar { ch: char, index: usize },

    #[error("exchange cannot be empty")]
    EmptyExchange,
    #[error("exchange length {len} exceeds max {max}")]
    ExchangeTooLong { len: usize, max: usize },
    #[error("exchange contains invalid character '{ch}' at index {index}")]
    ExchangeInvalidChar { ch: char, index: usize },
}

/// Misconfiguration detected before any work is scheduled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_concurrent must be greater than zero")]
    ZeroConcurrency,
    #[error("requests_per_minute must be greater than zero")]
    ZeroRequestRate,
    #[error("rate window must be greater than zero")]
    ZeroRateWindow,
    #[error("progress total steps must be greater than zero")]
    ZeroProgressSteps,
    #[error("retry policy is invalid: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error("environment variable {name} is required")]
    MissingEnv { name: &'static str },
}

/// Run-level errors surfaced to the caller of `BatchOrchestrator::run`.
///
/// Per-ticker failures never show up here; they are recorded in the summary.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("result store is unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl BatchError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "batch.config",
            Self::Validation(_) => "batch.validation",
            Self::StoreUnavailable(_) => "batch.store_unavailable",
        }
    }
}
