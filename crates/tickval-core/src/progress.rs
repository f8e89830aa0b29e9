//! Per-ticker step progress reported to a single replaceable observer.
//!
//! Observer faults (returned errors or panics) are logged and swallowed; they never reach
//! the analysis that reported the step.

use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

/// Default number of coarse phases in one ticker analysis.
pub const DEFAULT_TOTAL_STEPS: u32 = 7;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    pub step: u32,
    pub total: u32,
    pub task: String,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives progress updates.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate) -> Result<(), ObserverError>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressUpdate) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) -> Result<(), ObserverError> {
        self(update)
    }
}

#[derive(Default)]
struct TrackerState {
    current: u32,
    observer: Option<Arc<dyn ProgressObserver>>,
}

/// Step counter bound to at most one observer.
pub struct ProgressTracker {
    total: u32,
    ticker: Option<String>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    /// A `total` of zero is clamped to one.
    pub fn new(total: u32) -> Self {
        Self {
            total: total.max(1),
            ticker: None,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Tracker whose updates are tagged with `ticker`, sharing `observer` if given.
    pub fn for_ticker(
        total: u32,
        ticker: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Self {
        let tracker = Self {
            ticker: Some(ticker.into()),
            ..Self::new(total)
        };
        if let Some(observer) = observer {
            tracker.register(observer);
        }
        tracker
    }

    pub const fn total(&self) -> u32 {
        self.total
    }

    pub fn ticker(&self) -> Option<&str> {
        self.ticker.as_deref()
    }

    /// Replaces the current observer, if any.
    pub fn register(&self, observer: Arc<dyn ProgressObserver>) {
        self.lock().observer = Some(observer);
    }

    pub fn unregister(&self) {
        self.lock().observer = None;
    }

    pub fn current_step(&self) -> u32 {
        self.lock().current
    }

    /// Advances one step and notifies the observer.
    pub fn step(&self, task: &str) {
        let (step, observer) = {
            let mut state = self.lock();
            state.current = state.current.saturating_add(1);
            (state.current, state.observer.clone())
        };
        self.notify(observer, step, task);
    }

    /// Moves the counter back to `step` without notifying, so a retried phase reports
    /// the same step numbers again.
    pub fn rewind(&self, step: u32) {
        let mut state = self.lock();
        state.current = state.current.min(step);
    }

    /// Jumps to the final step.
    pub fn finish(&self, task: &str) {
        let observer = {
            let mut state = self.lock();
            state.current = self.total;
            state.observer.clone()
        };
        self.notify(observer, self.total, task);
    }

    fn notify(&self, observer: Option<Arc<dyn ProgressObserver>>, step: u32, task: &str) {
        // Called without holding the lock so observers may call back into the tracker.
        let Some(observer) = observer else {
            return;
        };

        let update = ProgressUpdate {
            ticker: self.ticker.clone(),
            step,
            total: self.total,
            task: task.to_string(),
            progress: percent(step, self.total),
        };

        match catch_unwind(AssertUnwindSafe(|| observer.on_progress(&update))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(
                    ticker = update.ticker.as_deref().unwrap_or("-"),
                    step,
                    task,
                    error = %error,
                    "progress observer failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    ticker = update.ticker.as_deref().unwrap_or("-"),
                    step,
                    task,
                    "progress observer panicked"
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .expect("progress tracker state should not be poisoned")
    }
}

impl Debug for ProgressTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.total)
            .field("ticker", &self.ticker)
            .field("current", &self.current_step())
            .finish()
    }
}

fn percent(step: u32, total: u32) -> f64 {
    (f64::from(step) / f64::from(total) * 100.0).min(100.0)
}
