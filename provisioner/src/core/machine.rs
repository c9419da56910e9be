//! Per-step state machine: `Pending → Probing → {Skipped | Running → (Succeeded | Failed)}`.
//!
//! The orchestrator gathers the inputs (probe result, user answers, action
//! result) and these functions decide the transitions.

use crate::core::types::{ActionResult, SkipReason, StateResult, StepOutcome};

/// Lifecycle position of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Probing,
    Running,
    Skipped(SkipReason),
    Succeeded,
    Failed,
}

/// Interactive answer given for a satisfied step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoChoice {
    /// Not asked (non-interactive run).
    NotAsked,
    /// User kept the existing effect.
    Declined,
    /// User asked to run the action again (and confirmed, for destructive steps).
    Requested,
}

/// `Probing → Skipped | Running`.
pub fn after_probe(result: &StateResult, redo: RedoChoice) -> StepState {
    match (result, redo) {
        (StateResult::Satisfied, RedoChoice::NotAsked) => {
            StepState::Skipped(SkipReason::AlreadySatisfied)
        }
        (StateResult::Satisfied, RedoChoice::Declined) => StepState::Skipped(SkipReason::ByRequest),
        (StateResult::Satisfied, RedoChoice::Requested) => StepState::Running,
        (StateResult::Unsatisfied | StateResult::Indeterminate { .. }, _) => StepState::Running,
    }
}

/// `Running → Succeeded | Failed`.
pub fn after_action(result: &ActionResult) -> StepState {
    match result {
        ActionResult::Success => StepState::Succeeded,
        ActionResult::Failure(_) => StepState::Failed,
    }
}

/// Whether a terminal outcome stops the run before any later step starts.
pub fn halts_run(outcome: &StepOutcome, optional: bool) -> bool {
    outcome.is_failed() && !optional
}
