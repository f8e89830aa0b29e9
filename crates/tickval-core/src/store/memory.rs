use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::{BackendKind, StoreBackend, StoreError, StoreFuture};
use crate::domain::{AnalysisResult, Exchange, ResultKey, Ticker};

/// In-process backend keyed by `(exchange, ticker)`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    results: Mutex<HashMap<ResultKey, AnalysisResult>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `results`; later entries win on duplicate keys.
    pub fn with_results(results: impl IntoIterator<Item = AnalysisResult>) -> Self {
        let backend = Self::new();
        {
            let mut map = backend.lock();
            for result in results {
                map.insert(result.key(), result);
            }
        }
        backend
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ResultKey, AnalysisResult>> {
        self.results
            .lock()
            .expect("memory store should not be poisoned")
    }
}

impl StoreBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn get<'a>(&'a self, key: &'a ResultKey) -> StoreFuture<'a, Option<AnalysisResult>> {
        Box::pin(async move { Ok(self.lock().get(key).cloned()) })
    }

    fn upsert<'a>(&'a self, result: &'a AnalysisResult) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if result.success && result.payload.is_none() {
                return Err(StoreError::malformed_record(format!(
                    "successful result for {} has no payload",
                    result.key()
                )));
            }
            self.lock().insert(result.key(), result.clone());
            Ok(())
        })
    }

    fn list_completed<'a>(&'a self, exchange: &'a Exchange) -> StoreFuture<'a, BTreeSet<Ticker>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .values()
                .filter(|result| result.success && &result.exchange == exchange)
                .map(|result| result.ticker.clone())
                .collect())
        })
    }
}
