//! Scripted fakes for unit and integration tests (`test-support` feature).

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::{ActionResult, StateResult};
use crate::io::config::{RunConfig, RunRequest, Settings};
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec, ExitState};
use crate::io::prompt::{Prompter, StepChoice};
use crate::steps::Step;

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutput>;

enum Responder {
    /// Replies in order; the last reply repeats.
    Queue(VecDeque<CommandOutput>),
    Handler(Handler),
    /// Exits 0 and makes the named program available from then on.
    Installs(String),
}

struct Rule {
    prefix: Vec<String>,
    responder: Responder,
}

/// [`CommandRunner`] replying from argv-prefix rules.
///
/// The longest matching prefix wins; among equal prefixes the rule added last
/// wins. Unmatched commands exit 0 with no output. Every program is found on
/// `PATH` unless marked [`missing`](ScriptedRunner::missing), in which case
/// running it fails to spawn.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    missing: RefCell<BTreeSet<String>>,
    calls: RefCell<Vec<CommandSpec>>,
}

fn owned<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|item| item.as_ref().to_string()).collect()
}

fn starts_with<S: AsRef<str>>(argv: &[&str], prefix: &[S]) -> bool {
    prefix.len() <= argv.len()
        && prefix
            .iter()
            .zip(argv)
            .all(|(want, got)| want.as_ref() == *got)
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<S: AsRef<str>>(&self, prefix: &[S], output: CommandOutput) {
        self.on_sequence(prefix, vec![output]);
    }

    pub fn on_sequence<S: AsRef<str>>(&self, prefix: &[S], outputs: Vec<CommandOutput>) {
        self.rules.borrow_mut().push(Rule {
            prefix: owned(prefix),
            responder: Responder::Queue(outputs.into()),
        });
    }

    /// Reply by calling `handler`, which may also touch the filesystem the way
    /// the real command would.
    pub fn on_call<S, F>(&self, prefix: &[S], handler: F)
    where
        S: AsRef<str>,
        F: Fn(&CommandSpec) -> CommandOutput + 'static,
    {
        self.rules.borrow_mut().push(Rule {
            prefix: owned(prefix),
            responder: Responder::Handler(Box::new(handler)),
        });
    }

    pub fn missing(&self, program: &str) {
        self.missing.borrow_mut().insert(program.to_string());
    }

    /// Put a [`missing`](ScriptedRunner::missing) program back on `PATH`.
    pub fn install(&self, program: &str) {
        self.missing.borrow_mut().remove(program);
    }

    /// Commands matching `prefix` install `program`, as a package manager would.
    pub fn on_install<S: AsRef<str>>(&self, prefix: &[S], program: &str) {
        self.rules.borrow_mut().push(Rule {
            prefix: owned(prefix),
            responder: Responder::Installs(program.to_string()),
        });
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Number of recorded calls whose argv starts with `prefix`.
    pub fn count<S: AsRef<str>>(&self, prefix: &[S]) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|spec| starts_with(&spec.argv(), prefix))
            .count()
    }

    /// Recorded calls rendered with secrets masked.
    pub fn history(&self) -> Vec<String> {
        self.calls.borrow().iter().map(CommandSpec::display).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls.borrow_mut().push(spec.clone());
        if self.missing.borrow().contains(&spec.program) {
            return CommandOutput::with_status(ExitState::SpawnFailed(format!(
                "{}: not found",
                spec.program
            )));
        }

        let argv = spec.argv();
        let mut rules = self.rules.borrow_mut();
        let best = rules
            .iter_mut()
            .enumerate()
            .filter(|(_, rule)| starts_with(&argv, rule.prefix.as_slice()))
            .max_by_key(|(idx, rule)| (rule.prefix.len(), *idx))
            .map(|(_, rule)| rule);
        match best {
            None => CommandOutput::exited(0, "", ""),
            Some(rule) => match &mut rule.responder {
                Responder::Handler(handler) => handler(spec),
                Responder::Installs(program) => {
                    self.missing.borrow_mut().remove(program.as_str());
                    CommandOutput::exited(0, "", "")
                }
                Responder::Queue(queue) => {
                    if queue.len() > 1 {
                        queue.pop_front().unwrap_or_else(|| CommandOutput::exited(0, "", ""))
                    } else {
                        queue
                            .front()
                            .cloned()
                            .unwrap_or_else(|| CommandOutput::exited(0, "", ""))
                    }
                }
            },
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing.borrow().contains(program) {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(program))
        }
    }
}

/// [`Prompter`] answering from queues and recording every question.
///
/// Defaults once a queue runs dry: check the step, decline redo, decline confirmation.
#[derive(Default)]
pub struct ScriptedPrompter {
    choices: RefCell<VecDeque<StepChoice>>,
    redo: RefCell<VecDeque<bool>>,
    confirm: RefCell<VecDeque<bool>>,
    cancel: bool,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_choices(self, choices: impl IntoIterator<Item = StepChoice>) -> Self {
        self.choices.borrow_mut().extend(choices);
        self
    }

    pub fn with_redo(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.redo.borrow_mut().extend(answers);
        self
    }

    pub fn with_confirm(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirm.borrow_mut().extend(answers);
        self
    }

    /// Every prompt fails, like a closed terminal.
    pub fn cancelling() -> Self {
        Self {
            cancel: true,
            ..Self::default()
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    fn ask(&self, question: String) -> Result<()> {
        self.asked.borrow_mut().push(question);
        if self.cancel {
            return Err(anyhow!("prompt interrupted"));
        }
        Ok(())
    }
}

impl Prompter for ScriptedPrompter {
    fn before_step(&self, id: u32, _label: &str) -> Result<StepChoice> {
        self.ask(format!("before:{id}"))?;
        Ok(self
            .choices
            .borrow_mut()
            .pop_front()
            .unwrap_or(StepChoice::Check))
    }

    fn redo(&self, id: u32, _label: &str) -> Result<bool> {
        self.ask(format!("redo:{id}"))?;
        Ok(self.redo.borrow_mut().pop_front().unwrap_or(false))
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        self.ask(format!("confirm:{message}"))?;
        Ok(self.confirm.borrow_mut().pop_front().unwrap_or(false))
    }
}

/// Settings with no retry delay, so bounded loops finish instantly.
pub fn fast_settings() -> Settings {
    Settings {
        retry_delay_secs: 0,
        ..Settings::default()
    }
}

pub fn run_request(base_dir: &Path, project: &str) -> RunRequest {
    RunRequest {
        project: project.to_string(),
        base_dir: base_dir.to_path_buf(),
        interactive: false,
        clean: false,
        resume: false,
        token: None,
        settings: fast_settings(),
    }
}

/// Non-interactive config for `instance` under `base_dir`.
pub fn run_config(base_dir: &Path, instance: &str) -> RunConfig {
    run_request(base_dir, instance).into_config(instance.to_string())
}

/// Shared log of probe and action invocations (`probe:3`, `run:3`).
pub type Journal = Rc<RefCell<Vec<String>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// Synthetic step with a fixed probe result and action result.
pub fn fixed_step(id: u32, state: StateResult, result: ActionResult) -> Step {
    journaled_step(id, state, result, &journal())
}

/// Like [`fixed_step`], recording each probe and action call in `journal`.
pub fn journaled_step(id: u32, state: StateResult, result: ActionResult, journal: &Journal) -> Step {
    let probe_log = Rc::clone(journal);
    let action_log = Rc::clone(journal);
    Step::new(
        id,
        format!("step-{id}"),
        format!("Step {id}"),
        move |_| {
            probe_log.borrow_mut().push(format!("probe:{id}"));
            state.clone()
        },
        move |_| {
            action_log.borrow_mut().push(format!("run:{id}"));
            result.clone()
        },
    )
}
