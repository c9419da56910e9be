//! Append-only record of step outcomes for one run, and its rendering.

use std::fmt::Write as _;

use crate::core::types::{FailureKind, SkipReason, StepOutcome};
use crate::exit_codes;

/// One step that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub id: u32,
    pub key: String,
    pub label: String,
    pub optional: bool,
    pub outcome: StepOutcome,
}

/// Why a run ended before the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stop {
    /// A non-optional step failed.
    StepFailed { id: u32, label: String },
    /// An interactive prompt was aborted while handling this step.
    Cancelled { id: u32, label: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_reached: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    total_steps: usize,
    records: Vec<StepRecord>,
    stop: Option<Stop>,
}

impl RunReport {
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            records: Vec::new(),
            stop: None,
        }
    }

    pub fn record(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn halt(&mut self, stop: Stop) {
        self.stop = Some(stop);
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn stop(&self) -> Option<&Stop> {
        self.stop.as_ref()
    }

    pub fn outcome_of(&self, id: u32) -> Option<&StepOutcome> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .map(|record| &record.outcome)
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for record in &self.records {
            match record.outcome {
                StepOutcome::Ran => counts.ran += 1,
                StepOutcome::Skipped(_) => counts.skipped += 1,
                StepOutcome::Failed(_) => counts.failed += 1,
            }
        }
        counts.not_reached = self.total_steps.saturating_sub(self.records.len());
        counts
    }

    pub fn succeeded(&self) -> bool {
        self.stop.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.stop {
            None => exit_codes::OK,
            Some(Stop::Cancelled { .. }) => exit_codes::CANCELLED,
            Some(Stop::StepFailed { id, .. }) => match self.outcome_of(*id) {
                Some(StepOutcome::Failed(failure)) if failure.kind == FailureKind::Conflict => {
                    exit_codes::CONFLICT
                }
                _ => exit_codes::STEP_FAILED,
            },
        }
    }

    /// Human-readable summary: per-step lines, totals, and failure diagnostics.
    pub fn render(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{title} ({} steps)", self.total_steps);
        for record in &self.records {
            let _ = writeln!(
                out,
                "  [{:>2}] {:<34} {}",
                record.id,
                record.label,
                describe_outcome(record)
            );
        }

        let counts = self.counts();
        let _ = writeln!(
            out,
            "ran {}, skipped {}, failed {}, not reached {}",
            counts.ran, counts.skipped, counts.failed, counts.not_reached
        );

        for record in &self.records {
            if let StepOutcome::Failed(failure) = &record.outcome {
                let _ = writeln!(
                    out,
                    "step {} ({}) failed: {}",
                    record.id, record.label, failure.reason
                );
            }
        }

        match &self.stop {
            Some(Stop::StepFailed { id, label }) => {
                let _ = writeln!(out, "stopped at step {id} ({label})");
            }
            Some(Stop::Cancelled { id, label }) => {
                let _ = writeln!(out, "cancelled at step {id} ({label})");
            }
            None => {}
        }
        out
    }
}

fn describe_outcome(record: &StepRecord) -> String {
    match &record.outcome {
        StepOutcome::Ran => "ran".to_string(),
        StepOutcome::Skipped(SkipReason::AlreadySatisfied) => {
            "skipped (already satisfied)".to_string()
        }
        StepOutcome::Skipped(SkipReason::ByRequest) => "skipped (by request)".to_string(),
        StepOutcome::Failed(_) if record.optional => "failed (optional, continued)".to_string(),
        StepOutcome::Failed(_) => "FAILED".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepFailure;

    fn record(id: u32, optional: bool, outcome: StepOutcome) -> StepRecord {
        StepRecord {
            id,
            key: format!("step-{id}"),
            label: format!("Step {id}"),
            optional,
            outcome,
        }
    }

    #[test]
    fn counts_include_unreached_steps() {
        let mut report = RunReport::new(5);
        report.record(record(1, false, StepOutcome::Ran));
        report.record(record(
            2,
            false,
            StepOutcome::Skipped(SkipReason::AlreadySatisfied),
        ));
        report.record(record(
            3,
            false,
            StepOutcome::Failed(StepFailure::command("exit 1")),
        ));
        report.halt(Stop::StepFailed {
            id: 3,
            label: "Step 3".to_string(),
        });

        assert_eq!(
            report.counts(),
            OutcomeCounts {
                ran: 1,
                skipped: 1,
                failed: 1,
                not_reached: 2
            }
        );
        assert_eq!(report.exit_code(), exit_codes::STEP_FAILED);
        assert!(!report.succeeded());
    }

    #[test]
    fn render_names_failing_step_and_reason() {
        let mut report = RunReport::new(3);
        report.record(record(1, false, StepOutcome::Ran));
        report.record(record(
            2,
            false,
            StepOutcome::Failed(StepFailure::command("`ddev start` exited with status 1")),
        ));
        report.halt(Stop::StepFailed {
            id: 2,
            label: "Step 2".to_string(),
        });

        let text = report.render("blog");
        assert!(text.starts_with("blog (3 steps)\n"));
        assert!(text.contains("ran 1, skipped 0, failed 1, not reached 1"));
        assert!(text.contains("step 2 (Step 2) failed: `ddev start` exited with status 1"));
        assert!(text.contains("stopped at step 2 (Step 2)"));
    }

    #[test]
    fn optional_failure_keeps_success_exit() {
        let mut report = RunReport::new(2);
        report.record(record(
            1,
            true,
            StepOutcome::Failed(StepFailure::command("mkcert -install exited")),
        ));
        report.record(record(2, false, StepOutcome::Ran));

        assert_eq!(report.exit_code(), exit_codes::OK);
        assert!(report.render("blog").contains("failed (optional, continued)"));
    }

    #[test]
    fn conflict_and_cancel_have_distinct_exit_codes() {
        let mut conflict = RunReport::new(3);
        conflict.record(record(
            1,
            false,
            StepOutcome::Failed(StepFailure::conflict("not empty")),
        ));
        conflict.halt(Stop::StepFailed {
            id: 1,
            label: "Step 1".to_string(),
        });
        assert_eq!(conflict.exit_code(), exit_codes::CONFLICT);

        let mut cancelled = RunReport::new(3);
        cancelled.halt(Stop::Cancelled {
            id: 1,
            label: "Step 1".to_string(),
        });
        assert_eq!(cancelled.exit_code(), exit_codes::CANCELLED);
        assert!(cancelled.render("blog").contains("cancelled at step 1"));
    }
}
