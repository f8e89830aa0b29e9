//! Concurrent, rate-limited, resumable batch runner.
//!
//! A run validates its inputs, optionally loads completed tickers from the store, and
//! hands the rest to `max_concurrent` workers pulling from one queue. Each worker takes a
//! ticker end to end: permit, analysis, persistence, progress. Per-ticker failures are
//! recorded in the job table and never abort the run; only cancellation does.

mod jobs;
mod summary;

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::analyzer::{AnalyzeContext, AnalyzeError, AnalyzeErrorKind, Analyzer};
use crate::cancel::CancelToken;
use crate::config::BatchConfig;
use crate::domain::{
    dedupe_tickers, now_rfc3339, AnalysisResult, Exchange, RequestedTicker, ResultKey, Ticker,
};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::ResilientStore;
use crate::BatchError;

pub use jobs::{JobCounts, JobState, JobTable, TickerJob, TransitionError};
pub use summary::{BatchSummary, TickerFailure};

const CANCELLED: &str = "cancelled";

/// Runs ticker batches against an [`Analyzer`] and persists results through a
/// [`ResilientStore`].
///
/// The rate limiter lives as long as the orchestrator, so back-to-back runs share one
/// request budget.
pub struct BatchOrchestrator {
    config: BatchConfig,
    store: ResilientStore,
    analyzer: Arc<dyn Analyzer>,
    limiter: Arc<RateLimiter>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl BatchOrchestrator {
    /// Validates `config` and builds the shared limiter.
    pub fn new(
        config: BatchConfig,
        store: ResilientStore,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, BatchError> {
        config.validate()?;
        let limiter = RateLimiter::new(config.requests_per_minute, config.rate_window)?;
        Ok(Self {
            config,
            store,
            analyzer,
            limiter: Arc::new(limiter),
            observer: None,
        })
    }

    /// Registers the observer every per-ticker tracker reports to.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &ResilientStore {
        &self.store
    }

    /// Runs to completion with no external cancellation.
    pub async fn run<I, S>(
        &self,
        tickers: I,
        exchange: &str,
        resume: bool,
    ) -> Result<BatchSummary, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with_cancel(tickers, exchange, resume, &CancelToken::new())
            .await
    }

    /// Runs until every ticker is terminal or `cancel` fires.
    ///
    /// # Errors
    /// Only run-level problems are errors: an invalid exchange, or a store that cannot be
    /// reached (or read, when resuming) before scheduling starts. A cancelled run still
    /// returns `Ok` with `cancelled: true`.
    pub async fn run_with_cancel<I, S>(
        &self,
        tickers: I,
        exchange: &str,
        resume: bool,
        cancel: &CancelToken,
    ) -> Result<BatchSummary, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let started = Instant::now();
        let started_at = now_rfc3339();
        let run_id = Uuid::new_v4();

        let exchange = Exchange::parse(exchange)?;
        self.store
            .ping()
            .await
            .map_err(|error| BatchError::StoreUnavailable(error.into_inner()))?;

        let mut table = JobTable::new();
        let mut queue = VecDeque::new();
        for requested in dedupe_tickers(tickers) {
            table.insert(requested.key());
            match requested {
                RequestedTicker::Valid(ticker) => queue.push_back(ticker),
                RequestedTicker::Invalid { raw, error } => {
                    tracing::warn!(
                        %run_id,
                        ticker = %raw,
                        error = %error,
                        "rejecting invalid ticker"
                    );
                    record_transition(
                        &mut table,
                        &raw,
                        JobState::Failed,
                        Some(error.to_string()),
                    );
                }
            }
        }

        if resume {
            let completed = self
                .store
                .list_completed(&exchange)
                .await
                .map_err(|error| BatchError::StoreUnavailable(error.into_inner()))?;
            queue.retain(|ticker| {
                if completed.contains(ticker) {
                    record_transition(&mut table, ticker.as_str(), JobState::Skipped, None);
                    false
                } else {
                    true
                }
            });
        }

        tracing::info!(
            %run_id,
            exchange = %exchange,
            total = table.len(),
            scheduled = queue.len(),
            resume,
            "batch run started"
        );

        let worker_count = self.config.max_concurrent.min(queue.len());
        let shared = Arc::new(RunShared {
            run_id,
            exchange: exchange.clone(),
            store: self.store.clone(),
            analyzer: self.analyzer.clone(),
            limiter: self.limiter.clone(),
            observer: self.observer.clone(),
            analyze_retry: self.config.analyze_retry.clone(),
            analyze_timeout: self.config.analyze_timeout,
            progress_steps: self.config.progress_total_steps,
            cancel: cancel.clone(),
            queue: Mutex::new(queue),
            jobs: Mutex::new(table),
        });

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let shared = shared.clone();
            workers.spawn(async move { shared.work(worker).await });
        }

        let interrupted = tokio::select! {
            biased;
            () = drain(&mut workers) => false,
            () = cancel.cancelled() => true,
        };
        if interrupted {
            tracing::warn!(%run_id, "batch run cancelled; abandoning in-flight tickers");
            workers.abort_all();
            drain(&mut workers).await;
        }
        let cancelled = interrupted || cancel.is_cancelled();

        let mut table = shared.jobs();
        let reason = if cancelled {
            CANCELLED
        } else {
            "worker stopped before the ticker finished"
        };
        let unterminated = table.fail_unterminated(reason);
        if unterminated > 0 && !cancelled {
            tracing::error!(%run_id, unterminated, "tickers left unfinished by workers");
        }

        let counts = table.counts();
        let summary = BatchSummary {
            run_id,
            exchange: exchange.to_string(),
            total: table.len(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            duration_seconds: started.elapsed().as_secs_f64(),
            started_at,
            resumed: resume,
            cancelled,
            failures: table.failures(),
        };

        tracing::info!(
            %run_id,
            exchange = %summary.exchange,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled,
            duration_seconds = summary.duration_seconds,
            "batch run finished"
        );
        Ok(summary)
    }
}

/// State shared by the workers of one run.
struct RunShared {
    run_id: Uuid,
    exchange: Exchange,
    store: ResilientStore,
    analyzer: Arc<dyn Analyzer>,
    limiter: Arc<RateLimiter>,
    observer: Option<Arc<dyn ProgressObserver>>,
    analyze_retry: Option<RetryPolicy>,
    analyze_timeout: Option<Duration>,
    progress_steps: u32,
    cancel: CancelToken,
    queue: Mutex<VecDeque<Ticker>>,
    jobs: Mutex<JobTable>,
}

impl RunShared {
    async fn work(&self, worker: usize) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = self
                .queue
                .lock()
                .expect("run queue should not be poisoned")
                .pop_front();
            let Some(ticker) = next else {
                break;
            };
            self.process(worker, ticker).await;
        }
    }

    async fn process(&self, worker: usize, ticker: Ticker) {
        let key = ResultKey::new(self.exchange.clone(), ticker);
        let ticker = key.ticker.as_str();
        record_transition(&mut self.jobs(), ticker, JobState::Running, None);
        tracing::debug!(run_id = %self.run_id, worker, ticker, "ticker started");

        let progress =
            ProgressTracker::for_ticker(self.progress_steps, ticker, self.observer.clone());
        let outcome = self.analyze(&key, &progress).await;

        let result = match outcome {
            Ok(payload) => AnalysisResult::succeeded(&key, payload),
            Err(error)
                if error.kind() == AnalyzeErrorKind::Cancelled && self.cancel.is_cancelled() =>
            {
                // Left Running; the run closes it as cancelled without persisting anything.
                tracing::debug!(run_id = %self.run_id, ticker, "ticker abandoned by cancelled run");
                return;
            }
            Err(error) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    ticker,
                    code = error.code(),
                    error = %error,
                    "analysis failed"
                );
                AnalysisResult::failed(&key, error.to_string())
            }
        };

        progress.step("persist result");
        let (state, error) = match self.store.upsert(&key, &result).await {
            Ok(()) if result.success => (JobState::Succeeded, None),
            Ok(()) => (JobState::Failed, result.error.clone()),
            Err(error) => (
                JobState::Failed,
                Some(format!("result not persisted: {}", error.source_error())),
            ),
        };
        record_transition(&mut self.jobs(), ticker, state, error);
        progress.finish("done");
        tracing::debug!(run_id = %self.run_id, worker, ticker, state = %state, "ticker finished");
    }

    async fn analyze(
        &self,
        key: &ResultKey,
        progress: &ProgressTracker,
    ) -> Result<Value, AnalyzeError> {
        let checkpoint = progress.current_step();
        let Some(policy) = &self.analyze_retry else {
            return self.attempt(key, progress, checkpoint, 1).await;
        };

        let mut attempt = 0;
        policy
            .execute(
                || {
                    attempt += 1;
                    self.attempt(key, progress, checkpoint, attempt)
                },
                AnalyzeError::retryable,
            )
            .await
            .map_err(|error| error.into_inner())
    }

    async fn attempt(
        &self,
        key: &ResultKey,
        progress: &ProgressTracker,
        checkpoint: u32,
        attempt: u32,
    ) -> Result<Value, AnalyzeError> {
        if self.limiter.acquire(&self.cancel).await.is_err() {
            return Err(AnalyzeError::cancelled());
        }
        // Each attempt reports the same phases; restart from where analysis began.
        progress.rewind(checkpoint);
        progress.step("rate limit permit");

        let ctx = AnalyzeContext {
            exchange: &key.exchange,
            ticker: &key.ticker,
            timeout: self.analyze_timeout,
            progress,
            attempt,
        };
        match AssertUnwindSafe(self.analyzer.analyze(ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(AnalyzeError::internal(format!(
                "analyzer panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().expect("job table should not be poisoned")
    }
}

fn record_transition(table: &mut JobTable, ticker: &str, next: JobState, error: Option<String>) {
    if let Err(error) = table.transition(ticker, next, error) {
        tracing::error!(ticker, error = %error, "rejected job state transition");
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(error) = joined {
            if error.is_panic() {
                tracing::error!(error = %error, "batch worker panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
