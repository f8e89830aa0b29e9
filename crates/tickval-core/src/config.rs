//! Batch run configuration.
//!
//! Values are plain data passed into constructors; nothing here is global. `from_env`
//! overlays `TICKVAL_*` variables on top of the defaults.

use std::str::FromStr;
use std::time::Duration;

use crate::progress::DEFAULT_TOTAL_STEPS;
use crate::retry::RetryPolicy;
use crate::ConfigError;

pub const ENV_MAX_CONCURRENT: &str = "TICKVAL_MAX_CONCURRENT";
pub const ENV_REQUESTS_PER_MINUTE: &str = "TICKVAL_REQUESTS_PER_MINUTE";
pub const ENV_RATE_WINDOW_SECS: &str = "TICKVAL_RATE_WINDOW_SECS";
pub const ENV_ANALYZE_TIMEOUT_MS: &str = "TICKVAL_ANALYZE_TIMEOUT_MS";
pub const ENV_STORE_MAX_ATTEMPTS: &str = "TICKVAL_STORE_MAX_ATTEMPTS";

/// Knobs for one [`BatchOrchestrator`](crate::BatchOrchestrator).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Size of the worker pool.
    pub max_concurrent: usize,
    /// Permits granted per `rate_window`.
    pub requests_per_minute: u32,
    /// Length of the rolling rate window; one minute unless overridden.
    pub rate_window: Duration,
    /// Retry policy applied to every store operation.
    pub store_retry: RetryPolicy,
    /// Whole-ticker retry for retryable analysis failures. Disabled when `None`.
    pub analyze_retry: Option<RetryPolicy>,
    /// Per-ticker timeout handed to the analyzer.
    pub analyze_timeout: Option<Duration>,
    /// Phases reported per ticker.
    pub progress_total_steps: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            requests_per_minute: 30,
            rate_window: Duration::from_secs(60),
            store_retry: RetryPolicy::default(),
            analyze_retry: None,
            analyze_timeout: None,
            progress_total_steps: DEFAULT_TOTAL_STEPS,
        }
    }
}

impl BatchConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    pub fn with_analyze_retry(mut self, policy: RetryPolicy) -> Self {
        self.analyze_retry = Some(policy);
        self
    }

    pub fn with_analyze_timeout(mut self, timeout: Duration) -> Self {
        self.analyze_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::ZeroRequestRate);
        }
        if self.rate_window.is_zero() {
            return Err(ConfigError::ZeroRateWindow);
        }
        if self.progress_total_steps == 0 {
            return Err(ConfigError::ZeroProgressSteps);
        }
        self.store_retry.validate()?;
        if let Some(policy) = &self.analyze_retry {
            policy.validate()?;
        }
        Ok(())
    }

    /// Defaults overlaid with `TICKVAL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var::<usize, _>(&lookup, ENV_MAX_CONCURRENT)? {
            config.max_concurrent = value;
        }
        if let Some(value) = parse_var::<u32, _>(&lookup, ENV_REQUESTS_PER_MINUTE)? {
            config.requests_per_minute = value;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_RATE_WINDOW_SECS)? {
            config.rate_window = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_var::<u64, _>(&lookup, ENV_ANALYZE_TIMEOUT_MS)? {
            config.analyze_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, ENV_STORE_MAX_ATTEMPTS)? {
            config.store_retry.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Reads a non-blank environment variable.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { name, value: raw })
}
