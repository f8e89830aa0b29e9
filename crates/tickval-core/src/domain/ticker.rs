use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_TICKER_LEN: usize = 15;
const MAX_EXCHANGE_LEN: usize = 16;

/// Normalized ticker symbol.
///
/// Leading digits are accepted because several exchanges (HKEX, TSE) list numeric codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Parse and normalize a ticker to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyTicker);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_TICKER_LEN {
            return Err(ValidationError::TickerTooLong {
                len,
                max: MAX_TICKER_LEN,
            });
        }

        if let Some(first) = normalized.chars().next() {
            if !first.is_ascii_alphanumeric() {
                return Err(ValidationError::TickerInvalidStart { ch: first });
            }
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || ch == '.' || ch == '-';
            if !valid {
                return Err(ValidationError::TickerInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Ticker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Ticker {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

/// Exchange identifier such as `NYSE` or `LSE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Exchange(String);

impl Exchange {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyExchange);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_EXCHANGE_LEN {
            return Err(ValidationError::ExchangeTooLong {
                len,
                max: MAX_EXCHANGE_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
                return Err(ValidationError::ExchangeInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Exchange {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Exchange> for String {
    fn from(value: Exchange) -> Self {
        value.0
    }
}

/// One requested ticker after normalization: either a valid symbol or the raw input
/// together with the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedTicker {
    Valid(Ticker),
    Invalid { raw: String, error: ValidationError },
}

impl RequestedTicker {
    /// Key used for deduplication and job bookkeeping.
    pub fn key(&self) -> &str {
        match self {
            Self::Valid(ticker) => ticker.as_str(),
            Self::Invalid { raw, .. } => raw.as_str(),
        }
    }
}

/// Normalizes and deduplicates tickers, keeping first-seen order.
pub fn dedupe_tickers<I, S>(tickers: I) -> Vec<RequestedTicker>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut requested = Vec::new();

    for input in tickers {
        let input = input.as_ref();
        let entry = match Ticker::parse(input) {
            Ok(ticker) => RequestedTicker::Valid(ticker),
            Err(error) => RequestedTicker::Invalid {
                raw: input.trim().to_string(),
                error,
            },
        };

        if seen.insert(entry.key().to_string()) {
            requested.push(entry);
        }
    }

    requested
}
