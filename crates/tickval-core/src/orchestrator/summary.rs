use serde::Serialize;
use uuid::Uuid;

/// A ticker that ended the run in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerFailure {
    pub ticker: String,
    pub error: String,
}

/// Outcome of one batch run.
///
/// `succeeded + failed + skipped == total` always holds for a returned summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub exchange: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_seconds: f64,
    /// RFC 3339 UTC start time.
    pub started_at: String,
    pub resumed: bool,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TickerFailure>,
}

impl BatchSummary {
    /// Every requested ticker is accounted for.
    pub const fn is_complete(&self) -> bool {
        self.succeeded + self.failed + self.skipped == self.total
    }

    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
