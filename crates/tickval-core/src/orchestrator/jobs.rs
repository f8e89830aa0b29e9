use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use super::summary::TickerFailure;

/// Lifecycle of one ticker within a run.
///
/// ```text
/// Pending -> Running -> Succeeded | Failed
/// Pending -> Skipped            (already completed, resume)
/// Pending -> Failed             (invalid symbol, cancelled before start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("ticker '{0}' is not part of this run")]
    UnknownTicker(String),
    #[error("ticker '{ticker}' cannot move from {from} to {to}")]
    Illegal {
        ticker: String,
        from: JobState,
        to: JobState,
    },
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerJob {
    /// Normalized symbol, or the raw input for symbols that failed validation.
    pub ticker: String,
    pub state: JobState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl JobCounts {
    pub const fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.skipped
    }

    pub const fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Per-run job set, in request order.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<TickerJob>,
    index: HashMap<String, usize>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending job; returns `false` if the ticker is already present.
    pub fn insert(&mut self, ticker: impl Into<String>) -> bool {
        let ticker = ticker.into();
        if self.index.contains_key(&ticker) {
            return false;
        }
        self.index.insert(ticker.clone(), self.jobs.len());
        self.jobs.push(TickerJob {
            ticker,
            state: JobState::Pending,
            error: None,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn state(&self, ticker: &str) -> Option<JobState> {
        self.index.get(ticker).map(|&at| self.jobs[at].state)
    }

    pub fn jobs(&self) -> &[TickerJob] {
        &self.jobs
    }

    /// Moves `ticker` to `next`, rejecting transitions outside the lifecycle.
    pub fn transition(
        &mut self,
        ticker: &str,
        next: JobState,
        error: Option<String>,
    ) -> Result<JobState, TransitionError> {
        let at = *self
            .index
            .get(ticker)
            .ok_or_else(|| TransitionError::UnknownTicker(ticker.to_string()))?;
        let job = &mut self.jobs[at];
        let previous = job.state;
        if !previous.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                ticker: ticker.to_string(),
                from: previous,
                to: next,
            });
        }

        job.state = next;
        job.error = error;
        Ok(previous)
    }

    /// Marks every non-terminal job failed with `reason`; returns how many were touched.
    pub fn fail_unterminated(&mut self, reason: &str) -> usize {
        let mut touched = 0;
        for job in &mut self.jobs {
            if !job.state.is_terminal() {
                job.state = JobState::Failed;
                job.error = Some(reason.to_string());
                touched += 1;
            }
        }
        touched
    }

    pub fn counts(&self) -> JobCounts {
        self.jobs
            .iter()
            .fold(JobCounts::default(), |mut counts, job| {
                match job.state {
                    JobState::Pending => counts.pending += 1,
                    JobState::Running => counts.running += 1,
                    JobState::Succeeded => counts.succeeded += 1,
                    JobState::Failed => counts.failed += 1,
                    JobState::Skipped => counts.skipped += 1,
                }
                counts
            })
    }

    /// Failed jobs in request order.
    pub fn failures(&self) -> Vec<TickerFailure> {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Failed)
            .map(|job| TickerFailure {
                ticker: job.ticker.clone(),
                error: job
                    .error
                    .clone()
                    .unwrap_or_else(|| String::from("unknown error")),
            })
            .collect()
    }
}
