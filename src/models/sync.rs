//! Values produced by a sync run.

use serde::Serialize;

/// What happened to one object during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Committed as `REMOTE`.
    Succeeded,
    /// Reverted to `LOCAL` with the error recorded.
    Failed(String),
    /// Claim lost to another run; nothing was changed.
    Skipped,
}

/// Aggregate counts for one `run_sync` invocation.
///
/// Returned by value so overlapping runs never share counters.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub run_id: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SyncSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// Fold one object's outcome into the totals.
    pub fn record(&mut self, outcome: TransferOutcome) {
        self.processed += 1;
        match outcome {
            TransferOutcome::Succeeded => self.succeeded += 1,
            TransferOutcome::Failed(err) => {
                self.failed += 1;
                self.errors.push(err);
            }
            TransferOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Add another summary's counts and errors to this one.
    pub fn merge(&mut self, other: SyncSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_merge_accumulate() {
        let mut first = SyncSummary::new("run-a");
        first.record(TransferOutcome::Succeeded);
        first.record(TransferOutcome::Skipped);

        let mut second = SyncSummary::new("run-a");
        second.record(TransferOutcome::Failed("file x: boom".into()));

        first.merge(second);
        assert_eq!(first.processed, 3);
        assert_eq!(first.succeeded, 1);
        assert_eq!(first.failed, 1);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.errors, vec!["file x: boom".to_string()]);
        assert_eq!(first.run_id, "run-a");
    }
}
