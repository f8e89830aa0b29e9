//! Result persistence.
//!
//! A [`StoreBackend`] is one physical store (DuckDB file, cloud REST table, in-memory map).
//! [`ResilientStore`] wraps any backend with a [`RetryPolicy`](crate::RetryPolicy) and is
//! what the orchestrator talks to.
//!
//! | Backend | Selected when | Consistency |
//! |---------|---------------|-------------|
//! | [`LocalFileBackend`] | development / test | read-after-write |
//! | [`CloudTableBackend`] | production | eventually consistent reads |
//! | [`MemoryBackend`] | explicit, tests | read-after-write |

mod cloud;
mod local;
mod memory;
mod resilient;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::config::env_var;
use crate::domain::{AnalysisResult, Exchange, ResultKey, Ticker};
use crate::ConfigError;

pub use cloud::{CloudTableBackend, CloudTableConfig};
pub use local::LocalFileBackend;
pub use memory::MemoryBackend;
pub use resilient::ResilientStore;

pub const ENV_DEPLOYMENT: &str = "TICKVAL_ENV";
pub const ENV_DEPLOYMENT_FALLBACK: &str = "APP_ENV";
pub const ENV_STORE_BACKEND: &str = "TICKVAL_STORE_BACKEND";

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnv {
    #[default]
    Development,
    Test,
    Production,
}

impl DeploymentEnv {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Some(Self::Development),
            "test" | "testing" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Reads `TICKVAL_ENV`, falling back to `APP_ENV`; development when neither is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (name, value) = match lookup(ENV_DEPLOYMENT) {
            Some(value) => (ENV_DEPLOYMENT, value),
            None => match lookup(ENV_DEPLOYMENT_FALLBACK) {
                Some(value) => (ENV_DEPLOYMENT_FALLBACK, value),
                None => return Ok(Self::default()),
            },
        };
        Self::parse(&value).ok_or(ConfigError::InvalidEnv { name, value })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl Display for DeploymentEnv {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    LocalFile,
    CloudTable,
    Memory,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalFile => "local",
            Self::CloudTable => "cloud",
            Self::Memory => "memory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "file" | "duckdb" => Some(Self::LocalFile),
            "cloud" | "table" => Some(Self::CloudTable),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    /// Production uses the cloud table, everything else the local file.
    pub const fn for_env(env: DeploymentEnv) -> Self {
        match env {
            DeploymentEnv::Production => Self::CloudTable,
            DeploymentEnv::Development | DeploymentEnv::Test => Self::LocalFile,
        }
    }

    /// `TICKVAL_STORE_BACKEND` if set, otherwise derived from the deployment environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STORE_BACKEND) {
            return Self::parse(&value).ok_or(ConfigError::InvalidEnv {
                name: ENV_STORE_BACKEND,
                value,
            });
        }
        DeploymentEnv::from_lookup(lookup).map(Self::for_env)
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Timeout,
    Connection,
    Throttled,
    Unavailable,
    MalformedRecord,
    Unauthorized,
    Internal,
}

/// Structured store error carrying its own retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
    retryable: bool,
}

impl StoreError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Connection,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Throttled,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::MalformedRecord,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Unauthorized,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> StoreErrorKind {
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
            StoreErrorKind::Timeout => "store.timeout",
            StoreErrorKind::Connection => "store.connection",
            StoreErrorKind::Throttled => "store.throttled",
            StoreErrorKind::Unavailable => "store.unavailable",
            StoreErrorKind::MalformedRecord => "store.malformed_record",
            StoreErrorKind::Unauthorized => "store.unauthorized",
            StoreErrorKind::Internal => "store.internal",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for StoreError {}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// One physical result store.
///
/// Implementations must make `upsert` idempotent: writing the same result twice leaves
/// one row equal to it.
pub trait StoreBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Reachability check used before a run starts.
    fn ping(&self) -> StoreFuture<'_, ()>;

    fn get<'a>(&'a self, key: &'a ResultKey) -> StoreFuture<'a, Option<AnalysisResult>>;

    fn upsert<'a>(&'a self, result: &'a AnalysisResult) -> StoreFuture<'a, ()>;

    /// Tickers whose latest stored result for `exchange` succeeded.
    fn list_completed<'a>(&'a self, exchange: &'a Exchange) -> StoreFuture<'a, BTreeSet<Ticker>>;

    /// Retry classifier for this backend's errors.
    fn is_retryable(&self, error: &StoreError) -> bool {
        error.retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn production_selects_cloud_table() {
        let kind = BackendKind::from_lookup(lookup(&[(ENV_DEPLOYMENT, "prod")])).expect("kind");
        assert_eq!(kind, BackendKind::CloudTable);
    }

    #[test]
    fn unset_environment_defaults_to_local_file() {
        assert_eq!(
            BackendKind::from_lookup(lookup(&[])).expect("kind"),
            BackendKind::LocalFile
        );
        assert_eq!(
            DeploymentEnv::from_lookup(lookup(&[(ENV_DEPLOYMENT_FALLBACK, "test")])),
            Ok(DeploymentEnv::Test)
        );
    }

    #[test]
    fn explicit_backend_override_wins() {
        let kind = BackendKind::from_lookup(lookup(&[
            (ENV_DEPLOYMENT, "production"),
            (ENV_STORE_BACKEND, "local"),
        ]))
        .expect("kind");
        assert_eq!(kind, BackendKind::LocalFile);
    }

    #[test]
    fn unknown_environment_is_a_config_error() {
        let error = DeploymentEnv::from_lookup(lookup(&[(ENV_DEPLOYMENT, "staging")]))
            .expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidEnv { name: ENV_DEPLOYMENT, .. }));
    }

    #[test]
    fn error_codes_and_retry_flags_follow_kind() {
        assert!(StoreError::throttled("slow down").retryable());
        assert!(StoreError::timeout("deadline").retryable());
        assert!(!StoreError::unauthorized("bad key").retryable());

        let error = StoreError::malformed_record("payload is not JSON");
        assert!(!error.retryable());
        assert_eq!(error.code(), "store.malformed_record");
        assert_eq!(error.to_string(), "payload is not JSON (store.malformed_record)");
    }
}
