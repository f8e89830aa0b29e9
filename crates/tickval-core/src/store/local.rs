use std::collections::BTreeSet;

use tickval_warehouse::{ResultRecord, Warehouse, WarehouseConfig, WarehouseError};

use super::{BackendKind, StoreBackend, StoreError, StoreFuture};
use crate::domain::{AnalysisResult, Exchange, ResultKey, Ticker};

/// DuckDB file store for development and test deployments.
///
/// DuckDB calls are blocking, so every operation hops onto the blocking thread pool.
#[derive(Clone)]
pub struct LocalFileBackend {
    warehouse: Warehouse,
}

impl LocalFileBackend {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Opens (and migrates) the warehouse described by `config`.
    pub fn open(config: WarehouseConfig) -> Result<Self, StoreError> {
        Warehouse::open(config)
            .map(Self::new)
            .map_err(classify_warehouse_error)
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Warehouse) -> Result<T, WarehouseError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || operation(warehouse))
            .await
            .map_err(|error| StoreError::internal(format!("warehouse task failed: {error}")))?
            .map_err(classify_warehouse_error)
    }
}

impl StoreBackend for LocalFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalFile
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.blocking(|warehouse| warehouse.ping()))
    }

    fn get<'a>(&'a self, key: &'a ResultKey) -> StoreFuture<'a, Option<AnalysisResult>> {
        let exchange = key.exchange.to_string();
        let ticker = key.ticker.to_string();
        Box::pin(async move {
            let record = self
                .blocking(move |warehouse| warehouse.get_result(&exchange, &ticker))
                .await?;
            record.map(from_record).transpose()
        })
    }

    fn upsert<'a>(&'a self, result: &'a AnalysisResult) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let record = to_record(result)?;
            self.blocking(move |warehouse| warehouse.upsert_result(&record))
                .await
        })
    }

    fn list_completed<'a>(&'a self, exchange: &'a Exchange) -> StoreFuture<'a, BTreeSet<Ticker>> {
        let exchange = exchange.to_string();
        Box::pin(async move {
            let tickers = self
                .blocking(move |warehouse| warehouse.completed_tickers(&exchange))
                .await?;
            tickers
                .iter()
                .map(|ticker| {
                    Ticker::parse(ticker).map_err(|error| {
                        StoreError::malformed_record(format!("stored ticker '{ticker}': {error}"))
                    })
                })
                .collect()
        })
    }
}

fn classify_warehouse_error(error: WarehouseError) -> StoreError {
    match &error {
        WarehouseError::InvalidRecord(_) => StoreError::malformed_record(error.to_string()),
        WarehouseError::Io(_) => StoreError::unavailable(error.to_string()),
        WarehouseError::DuckDb(_) if error.is_transient() => {
            StoreError::unavailable(error.to_string())
        }
        WarehouseError::DuckDb(_) => StoreError::internal(error.to_string()),
    }
}

fn to_record(result: &AnalysisResult) -> Result<ResultRecord, StoreError> {
    let payload = result
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| StoreError::malformed_record(format!("payload is not serializable: {error}")))?;

    Ok(ResultRecord {
        exchange: result.exchange.to_string(),
        ticker: result.ticker.to_string(),
        success: result.success,
        payload,
        error: result.error.clone(),
        analyzed_at: result.analyzed_at.clone(),
    })
}

fn from_record(record: ResultRecord) -> Result<AnalysisResult, StoreError> {
    let malformed = |what: &str, detail: String| {
        StoreError::malformed_record(format!(
            "stored {what} for {}:{}: {detail}",
            record.exchange, record.ticker
        ))
    };

    let exchange =
        Exchange::parse(&record.exchange).map_err(|e| malformed("exchange", e.to_string()))?;
    let ticker = Ticker::parse(&record.ticker).map_err(|e| malformed("ticker", e.to_string()))?;
    let payload = record
        .payload
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| malformed("payload", e.to_string()))?;

    Ok(AnalysisResult {
        exchange,
        ticker,
        success: record.success,
        payload,
        error: record.error.clone(),
        analyzed_at: record.analyzed_at.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(dir: &tempfile::TempDir) -> LocalFileBackend {
        LocalFileBackend::open(WarehouseConfig::in_dir(dir.path())).expect("open warehouse")
    }

    fn key(ticker: &str) -> ResultKey {
        ResultKey::new(
            Exchange::parse("NYSE").expect("exchange"),
            Ticker::parse(ticker).expect("ticker"),
        )
    }

    #[tokio::test]
    async fn stores_and_reads_back_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = backend(&dir);
        let result = AnalysisResult::succeeded(&key("IBM"), json!({"fair_value": 182.4}));

        store.ping().await.expect("ping");
        store.upsert(&result).await.expect("upsert");

        let loaded = store.get(&key("IBM")).await.expect("get");
        assert_eq!(loaded, Some(result));
        assert_eq!(store.get(&key("KO")).await.expect("get"), None);
    }

    #[tokio::test]
    async fn failed_results_are_not_listed_as_completed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = backend(&dir);

        store
            .upsert(&AnalysisResult::succeeded(&key("IBM"), json!({})))
            .await
            .expect("upsert");
        store
            .upsert(&AnalysisResult::failed(&key("KO"), "not found"))
            .await
            .expect("upsert");

        let completed = store
            .list_completed(&Exchange::parse("NYSE").expect("exchange"))
            .await
            .expect("list");
        let completed: Vec<&str> = completed.iter().map(Ticker::as_str).collect();
        assert_eq!(completed, vec!["IBM"]);
    }

    #[test]
    fn invalid_records_are_fatal_and_io_errors_are_retryable() {
        let invalid = classify_warehouse_error(WarehouseError::InvalidRecord(String::from("x")));
        assert!(!invalid.retryable());

        let io = classify_warehouse_error(WarehouseError::Io(std::io::Error::other("disk")));
        assert!(io.retryable());
    }
}
