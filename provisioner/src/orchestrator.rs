//! Orchestrator: walks the step table in order and drives each step through
//! its state machine.

use anyhow::{Result, bail};
use tracing::{debug, error, info, instrument, warn};

use crate::core::machine::{RedoChoice, StepState, after_action, after_probe, halts_run};
use crate::core::report::{RunReport, StepRecord, Stop};
use crate::core::types::{ActionResult, SkipReason, StateResult, StepOutcome};
use crate::io::prompt::{Prompter, StepChoice};
use crate::steps::{Step, StepContext, validate_table};

/// Progress notifications, in order: `Started`, then `Probed` (absent when the
/// step was skipped before probing), then `Finished`.
#[derive(Debug)]
pub enum StepEvent<'a> {
    Started(&'a Step),
    Probed(&'a Step, &'a StateResult),
    Finished(&'a Step, &'a StepOutcome),
}

/// A prompt failed while a step was being decided.
struct PromptAborted(anyhow::Error);

/// Run `steps` in ascending id order.
///
/// Stops after the first failed non-optional step, or when an interactive
/// prompt cannot be answered. Either way the report says where it stopped;
/// `Err` is reserved for a malformed step table.
#[instrument(skip_all, fields(instance = %ctx.config.instance, steps = steps.len()))]
pub fn run_steps<F: FnMut(&StepEvent<'_>)>(
    steps: &[Step],
    ctx: &StepContext<'_>,
    prompter: &dyn Prompter,
    mut on_event: F,
) -> Result<RunReport> {
    validate_table(steps)?;
    let mut report = RunReport::new(steps.len());

    for step in steps {
        on_event(&StepEvent::Started(step));
        let outcome = match drive_step(step, ctx, prompter, &mut on_event)? {
            Ok(outcome) => outcome,
            Err(PromptAborted(err)) => {
                warn!(step = step.id, error = %format!("{err:#}"), "prompt aborted, stopping");
                report.halt(Stop::Cancelled {
                    id: step.id,
                    label: step.label.clone(),
                });
                break;
            }
        };

        match &outcome {
            StepOutcome::Failed(failure) if step.optional => {
                warn!(step = step.id, key = %step.key, reason = %failure, "optional step failed, continuing");
            }
            StepOutcome::Failed(failure) => {
                error!(step = step.id, key = %step.key, reason = %failure, "step failed");
            }
            StepOutcome::Ran => info!(step = step.id, key = %step.key, "step ran"),
            StepOutcome::Skipped(reason) => {
                debug!(step = step.id, key = %step.key, ?reason, "step skipped");
            }
        }

        on_event(&StepEvent::Finished(step, &outcome));
        let halt = halts_run(&outcome, step.optional);
        report.record(StepRecord {
            id: step.id,
            key: step.key.clone(),
            label: step.label.clone(),
            optional: step.optional,
            outcome,
        });
        if halt {
            report.halt(Stop::StepFailed {
                id: step.id,
                label: step.label.clone(),
            });
            break;
        }
    }

    Ok(report)
}

fn drive_step<F: FnMut(&StepEvent<'_>)>(
    step: &Step,
    ctx: &StepContext<'_>,
    prompter: &dyn Prompter,
    on_event: &mut F,
) -> Result<Result<StepOutcome, PromptAborted>> {
    let interactive = ctx.config.interactive;

    if interactive {
        match prompter.before_step(step.id, &step.label) {
            Ok(StepChoice::Check) => {}
            Ok(StepChoice::Skip) => return Ok(Ok(StepOutcome::Skipped(SkipReason::ByRequest))),
            Err(err) => return Ok(Err(PromptAborted(err))),
        }
    }

    let state = step.probe(ctx);
    if let StateResult::Indeterminate { reason } = &state {
        warn!(step = step.id, key = %step.key, %reason, "state unknown, running step");
    }
    on_event(&StepEvent::Probed(step, &state));

    let redo = if interactive && state.is_satisfied() {
        match ask_redo(step, prompter) {
            Ok(choice) => choice,
            Err(err) => return Ok(Err(PromptAborted(err))),
        }
    } else {
        RedoChoice::NotAsked
    };

    match after_probe(&state, redo) {
        StepState::Skipped(reason) => Ok(Ok(StepOutcome::Skipped(reason))),
        StepState::Running => {
            let result = step.run(ctx);
            match (after_action(&result), result) {
                (StepState::Succeeded, _) => Ok(Ok(StepOutcome::Ran)),
                (_, ActionResult::Failure(failure)) => Ok(Ok(StepOutcome::Failed(failure))),
                (state, ActionResult::Success) => {
                    bail!("step {} left running in state {state:?}", step.id)
                }
            }
        }
        other => bail!("step {} reached {other:?} straight after probing", step.id),
    }
}

/// Ask whether a satisfied step should run again. Destructive steps need a
/// second, explicit confirmation.
fn ask_redo(step: &Step, prompter: &dyn Prompter) -> Result<RedoChoice> {
    if !prompter.redo(step.id, &step.label)? {
        return Ok(RedoChoice::Declined);
    }
    if step.destructive {
        let message = format!(
            "Running step {} ({}) again erases the existing data. Continue?",
            step.id, step.label
        );
        if !prompter.confirm(&message)? {
            return Ok(RedoChoice::Declined);
        }
    }
    Ok(RedoChoice::Requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepFailure;
    use crate::exit_codes;
    use crate::io::prompt::AutoPrompter;
    use crate::test_support::{
        Journal, ScriptedPrompter, ScriptedRunner, journal, journaled_step, run_config,
    };

    fn ok(id: u32, state: StateResult, journal: &Journal) -> Step {
        journaled_step(id, state, ActionResult::Success, journal)
    }

    #[test]
    fn events_follow_step_lifecycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![
            ok(1, StateResult::Satisfied, &log),
            ok(2, StateResult::Unsatisfied, &log),
        ];

        let mut events = Vec::new();
        let report = run_steps(&steps, &ctx, &AutoPrompter, |event| {
            events.push(match event {
                StepEvent::Started(step) => format!("start:{}", step.id),
                StepEvent::Probed(step, _) => format!("probe:{}", step.id),
                StepEvent::Finished(step, _) => format!("finish:{}", step.id),
            });
        })
        .expect("run");

        assert!(report.succeeded());
        assert_eq!(
            events,
            vec!["start:1", "probe:1", "finish:1", "start:2", "probe:2", "finish:2"]
        );
    }

    #[test]
    fn indeterminate_probe_runs_the_action() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![ok(1, StateResult::indeterminate("tool timed out"), &log)];

        let report = run_steps(&steps, &ctx, &AutoPrompter, |_| {}).expect("run");
        assert_eq!(report.outcome_of(1), Some(&StepOutcome::Ran));
        assert_eq!(*log.borrow(), vec!["probe:1", "run:1"]);
    }

    #[test]
    fn malformed_table_runs_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![
            ok(2, StateResult::Unsatisfied, &log),
            ok(1, StateResult::Unsatisfied, &log),
        ];

        assert!(run_steps(&steps, &ctx, &AutoPrompter, |_| {}).is_err());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn interactive_skip_happens_before_probing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        config.interactive = true;
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![
            ok(1, StateResult::Unsatisfied, &log),
            ok(2, StateResult::Unsatisfied, &log),
        ];
        let prompter = ScriptedPrompter::new().with_choices([StepChoice::Skip, StepChoice::Check]);

        let report = run_steps(&steps, &ctx, &prompter, |_| {}).expect("run");
        assert_eq!(
            report.outcome_of(1),
            Some(&StepOutcome::Skipped(SkipReason::ByRequest))
        );
        assert_eq!(report.outcome_of(2), Some(&StepOutcome::Ran));
        assert_eq!(*log.borrow(), vec!["probe:2", "run:2"]);
    }

    #[test]
    fn interactive_redo_reruns_satisfied_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        config.interactive = true;
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![ok(1, StateResult::Satisfied, &log)];
        let prompter = ScriptedPrompter::new().with_redo([true]);

        let report = run_steps(&steps, &ctx, &prompter, |_| {}).expect("run");
        assert_eq!(report.outcome_of(1), Some(&StepOutcome::Ran));
        assert_eq!(prompter.asked(), vec!["before:1", "redo:1"]);
    }

    #[test]
    fn destructive_redo_needs_confirmation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        config.interactive = true;
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![ok(9, StateResult::Satisfied, &log).destructive()];

        let declined = ScriptedPrompter::new().with_redo([true]).with_confirm([false]);
        let report = run_steps(&steps, &ctx, &declined, |_| {}).expect("run");
        assert_eq!(
            report.outcome_of(9),
            Some(&StepOutcome::Skipped(SkipReason::ByRequest))
        );
        assert!(!log.borrow().contains(&"run:9".to_string()));

        let confirmed = ScriptedPrompter::new().with_redo([true]).with_confirm([true]);
        let report = run_steps(&steps, &ctx, &confirmed, |_| {}).expect("run");
        assert_eq!(report.outcome_of(9), Some(&StepOutcome::Ran));
        assert_eq!(confirmed.asked().len(), 3);
    }

    #[test]
    fn non_interactive_never_prompts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![ok(1, StateResult::Satisfied, &log)];
        let prompter = ScriptedPrompter::cancelling();

        let report = run_steps(&steps, &ctx, &prompter, |_| {}).expect("run");
        assert_eq!(
            report.outcome_of(1),
            Some(&StepOutcome::Skipped(SkipReason::AlreadySatisfied))
        );
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn aborted_prompt_cancels_the_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        config.interactive = true;
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![
            ok(1, StateResult::Unsatisfied, &log),
            ok(2, StateResult::Unsatisfied, &log),
        ];

        let report = run_steps(&steps, &ctx, &ScriptedPrompter::cancelling(), |_| {}).expect("run");
        assert_eq!(
            report.stop(),
            Some(&Stop::Cancelled {
                id: 1,
                label: "Step 1".to_string(),
            })
        );
        assert!(report.records().is_empty());
        assert!(log.borrow().is_empty());
        assert_eq!(report.exit_code(), exit_codes::CANCELLED);
    }

    #[test]
    fn conflict_failure_maps_to_conflict_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);
        let log = journal();
        let steps = vec![journaled_step(
            3,
            StateResult::Unsatisfied,
            ActionResult::Failure(StepFailure::conflict("directory holds other files")),
            &log,
        )];

        let report = run_steps(&steps, &ctx, &AutoPrompter, |_| {}).expect("run");
        assert_eq!(report.exit_code(), exit_codes::CONFLICT);
    }
}
