//! Retry logic with exponential backoff and jitter.
//!
//! A [`RetryPolicy`] is plain configuration. Whether a failure is worth another attempt
//! is decided by a caller-supplied predicate, so the same policy serves the DuckDB
//! store, the cloud table and (optionally) whole-ticker analysis retries.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::ConfigError;

/// Backoff and attempt limits for one class of operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound for the jitter-free delay.
    pub max_delay: Duration,
    /// Random extra delay drawn uniformly from `[0, jitter_max]`.
    pub jitter_max: Duration,
    /// Seed for the jitter source; `None` draws from entropy.
    pub jitter_seed: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter_max: Duration::from_millis(100),
            jitter_seed: None,
        }
    }
}

/// Terminal failure of [`RetryPolicy::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: Debug + Display,
{
    /// The predicate classified the failure as fatal; no retry was attempted.
    #[error("{source} (fatal after {attempts} attempt(s))")]
    Fatal { source: E, attempts: u32 },
    /// Every allowed attempt failed with a retryable error.
    #[error("{source} (retries exhausted after {attempts} attempt(s))")]
    Exhausted { source: E, attempts: u32 },
}

impl<E> RetryError<E>
where
    E: Debug + Display,
{
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn source_error(&self) -> &E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }
}

impl RetryPolicy {
    /// Exponential policy with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Single attempt, never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fixes the jitter seed so backoff timing is reproducible.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_max = Duration::ZERO;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: String::from("max_attempts must be at least 1"),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!("multiplier must be finite and >= 1.0, got {}", self.multiplier),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: String::from("max_delay must not be smaller than base_delay"),
            });
        }
        Ok(())
    }

    /// Jitter-free delay slept after failed attempt `attempt` (1-based):
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64).min(self.max_delay)
    }

    fn jitter(&self, rng: &mut fastrand::Rng) -> Duration {
        let max_nanos = u64::try_from(self.jitter_max.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rng.u64(0..=max_nanos))
    }

    /// Runs `operation` until it succeeds, fails fatally, or attempts run out.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        E: Debug + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut rng = match self.jitter_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                return Err(RetryError::Fatal {
                    source: error,
                    attempts: attempt,
                });
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    source: error,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for_attempt(attempt) + self.jitter(&mut rng);
            tracing::debug!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
