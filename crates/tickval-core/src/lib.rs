//! # Tickval Core
//!
//! Batch orchestration for per-ticker stock valuations.
//!
//! ## Overview
//!
//! This crate drives thousands of independent ticker analyses against a rate-limited
//! valuation service:
//!
//! - **Bounded worker pool** with a per-ticker state machine
//! - **Shared rate limiter** capping requests per rolling window
//! - **Resume** from persisted completion records
//! - **Resilient result store** retrying transient backend failures
//! - **Progress reporting** to a single, fault-isolated observer
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`analyzer`] | Valuation collaborator trait and HTTP client |
//! | [`cancel`] | Cooperative cancellation token |
//! | [`config`] | Batch configuration and environment overlay |
//! | [`domain`] | Tickers, exchanges and analysis results |
//! | [`error`] | Run-level error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`orchestrator`] | Batch runner, job table and summary |
//! | [`progress`] | Step progress tracker |
//! | [`rate_limit`] | Request throttle |
//! | [`retry`] | Exponential backoff with jitter |
//! | [`store`] | Result store backends and retrying facade |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickval_core::{BatchConfig, BatchOrchestrator, HttpAnalyzer, ResilientStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::from_env()?;
//!     let store = ResilientStore::from_env(config.store_retry.clone())?;
//!     let analyzer = Arc::new(HttpAnalyzer::from_env()?);
//!
//!     let orchestrator = BatchOrchestrator::new(config, store, analyzer)?;
//!     let summary = orchestrator.run(["AAPL", "MSFT", "KO"], "NYSE", true).await?;
//!     println!("{} succeeded, {} skipped", summary.succeeded, summary.skipped);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  BatchOrchestrator   │── resume ──▶ ResilientStore::list_completed
//! └──────────┬───────────┘
//!            │ max_concurrent workers
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ RateLimiter::acquire │────▶│ Analyzer         │
//! └──────────────────────┘     └────────┬─────────┘
//!                                       │
//!                                       ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ ProgressTracker      │◀────│ ResilientStore   │
//! └──────────────────────┘     │ (RetryPolicy)    │
//!                              └────────┬─────────┘
//!                                       ▼
//!                          DuckDB file | cloud table
//! ```
//!
//! ## Error Handling
//!
//! Per-ticker failures are recorded in the [`BatchSummary`]; only run-level problems
//! surface as [`BatchError`]:
//!
//! ```rust
//! use tickval_core::BatchError;
//!
//! fn exit_code(error: &BatchError) -> i32 {
//!     match error {
//!         BatchError::Config(_) | BatchError::Validation(_) => 2,
//!         BatchError::StoreUnavailable(_) => 6,
//!     }
//! }
//! ```

pub mod analyzer;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod store;

// Analyzer collaborator
pub use analyzer::{
    AnalyzeContext, AnalyzeError, AnalyzeErrorKind, AnalyzeFuture, Analyzer, HttpAnalyzer,
};

// Cancellation
pub use cancel::{CancelToken, Cancelled};

// Configuration
pub use config::BatchConfig;

// Domain models
pub use domain::{dedupe_tickers, AnalysisResult, Exchange, RequestedTicker, ResultKey, Ticker};

// Error types
pub use error::{BatchError, ConfigError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpFuture, HttpMethod, HttpRequest,
    HttpResponse, ReqwestHttpClient,
};

// Orchestration
pub use orchestrator::{
    BatchOrchestrator, BatchSummary, JobCounts, JobState, JobTable, TickerFailure, TickerJob,
    TransitionError,
};

// Progress reporting
pub use progress::{ObserverError, ProgressObserver, ProgressTracker, ProgressUpdate};

// Throttling and retry
pub use rate_limit::RateLimiter;
pub use retry::{RetryError, RetryPolicy};

// Result stores
pub use store::{
    BackendKind, CloudTableBackend, CloudTableConfig, DeploymentEnv, LocalFileBackend,
    MemoryBackend, ResilientStore, StoreBackend, StoreError, StoreErrorKind, StoreFuture,
};

// Warehouse (re-exported from tickval-warehouse)
pub use tickval_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
