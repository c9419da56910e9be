//! Shared deterministic types for the provisioning core.
//!
//! These types define the contracts between probes, actions, the orchestrator
//! and the run report. They hold no I/O handles.

use std::fmt;

/// What a probe observed about a step's real-world effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateResult {
    /// Effect already present; the step can be skipped.
    Satisfied,
    /// Effect absent; the step must run.
    Unsatisfied,
    /// The probe itself could not decide (tool missing, query failed).
    /// Treated as `Unsatisfied`, but reported as a warning.
    Indeterminate { reason: String },
}

impl StateResult {
    pub fn indeterminate(reason: impl Into<String>) -> Self {
        StateResult::Indeterminate {
            reason: reason.into(),
        }
    }

    pub fn from_bool(present: bool) -> Self {
        if present {
            StateResult::Satisfied
        } else {
            StateResult::Unsatisfied
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, StateResult::Satisfied)
    }
}

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// An external command exited non-zero, was killed, or could not start.
    Command,
    /// An external command exceeded its timeout.
    Timeout,
    /// The action's own precondition did not hold.
    Precondition,
    /// The target holds content that is not a prior installation.
    Conflict,
    /// A local filesystem operation failed.
    Io,
}

/// Why a step's action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl StepFailure {
    pub fn command(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Command,
            reason: reason.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Precondition,
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Conflict,
            reason: reason.into(),
        }
    }

    pub fn io(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Io,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Outcome of running a step's action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Success,
    Failure(StepFailure),
}

impl From<Result<(), StepFailure>> for ActionResult {
    fn from(result: Result<(), StepFailure>) -> Self {
        match result {
            Ok(()) => ActionResult::Success,
            Err(failure) => ActionResult::Failure(failure),
        }
    }
}

/// Why a step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The probe reported the effect as present.
    AlreadySatisfied,
    /// The user chose to skip in interactive mode.
    ByRequest,
}

/// Terminal outcome of a step, as recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped(SkipReason),
    Ran,
    Failed(StepFailure),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}
