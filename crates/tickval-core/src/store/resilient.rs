use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tickval_warehouse::WarehouseConfig;

use super::{
    BackendKind, CloudTableBackend, CloudTableConfig, LocalFileBackend, MemoryBackend,
    StoreBackend, StoreError, StoreFuture,
};
use crate::domain::{AnalysisResult, Exchange, ResultKey, Ticker};
use crate::retry::{RetryError, RetryPolicy};
use crate::BatchError;

/// Retrying facade over one [`StoreBackend`].
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct ResilientStore {
    backend: Arc<dyn StoreBackend>,
    policy: RetryPolicy,
}

impl ResilientStore {
    pub fn new(backend: Arc<dyn StoreBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn in_memory(policy: RetryPolicy) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), policy)
    }

    /// Builds the backend for `kind` from its environment configuration.
    pub fn open(kind: BackendKind, policy: RetryPolicy) -> Result<Self, BatchError> {
        policy.validate()?;
        let backend: Arc<dyn StoreBackend> = match kind {
            BackendKind::LocalFile => Arc::new(
                LocalFileBackend::open(WarehouseConfig::default())
                    .map_err(BatchError::StoreUnavailable)?,
            ),
            BackendKind::CloudTable => {
                Arc::new(CloudTableBackend::new(CloudTableConfig::from_env()?))
            }
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };
        tracing::debug!(backend = %kind, "result store opened");
        Ok(Self::new(backend, policy))
    }

    /// Backend chosen by `TICKVAL_STORE_BACKEND` / deployment environment.
    pub fn from_env(policy: RetryPolicy) -> Result<Self, BatchError> {
        Self::open(BackendKind::from_env()?, policy)
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn ping(&self) -> Result<(), RetryError<StoreError>> {
        self.retrying("ping", || self.backend.ping()).await
    }

    pub async fn get(
        &self,
        key: &ResultKey,
    ) -> Result<Option<AnalysisResult>, RetryError<StoreError>> {
        self.retrying("get", || self.backend.get(key)).await
    }

    /// Writes `result` under `key`. Replaying the same pair is safe.
    pub async fn upsert(
        &self,
        key: &ResultKey,
        result: &AnalysisResult,
    ) -> Result<(), RetryError<StoreError>> {
        if result.exchange != key.exchange || result.ticker != key.ticker {
            return Err(RetryError::Fatal {
                source: StoreError::malformed_record(format!(
                    "result for {} written under key {key}",
                    result.key()
                )),
                attempts: 0,
            });
        }
        self.retrying("upsert", || self.backend.upsert(result)).await
    }

    pub async fn list_completed(
        &self,
        exchange: &Exchange,
    ) -> Result<BTreeSet<Ticker>, RetryError<StoreError>> {
        self.retrying("list_completed", || self.backend.list_completed(exchange))
            .await
    }

    async fn retrying<'a, T, F>(
        &'a self,
        operation: &'static str,
        call: F,
    ) -> Result<T, RetryError<StoreError>>
    where
        F: FnMut() -> StoreFuture<'a, T>,
    {
        let backend = self.backend.as_ref();
        let outcome = self
            .policy
            .execute(call, |error| backend.is_retryable(error))
            .await;

        if let Err(error) = &outcome {
            tracing::warn!(
                operation,
                backend = %backend.kind(),
                attempts = error.attempts(),
                exhausted = error.is_exhausted(),
                error = %error.source_error(),
                "store operation failed"
            );
        }
        outcome
    }
}

impl Debug for ResilientStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("backend", &self.backend.kind())
            .field("policy", &self.policy)
            .finish()
    }
}
