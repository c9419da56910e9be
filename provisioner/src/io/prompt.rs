//! Interactive decisions for `--interactive` runs.
//!
//! The orchestrator only consults a [`Prompter`] when the run is interactive.
//! Tests use a scripted prompter with queued answers.

use anyhow::{Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};

/// What to do with a step before its probe runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChoice {
    /// Probe the step and run it if needed.
    Check,
    /// Skip it without probing.
    Skip,
}

pub trait Prompter {
    /// Asked before probing step `id`.
    fn before_step(&self, id: u32, label: &str) -> Result<StepChoice>;

    /// Asked when step `id` is already satisfied: run its action anyway?
    fn redo(&self, id: u32, label: &str) -> Result<bool>;

    /// Yes/no confirmation; `false` declines.
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Answers for unattended runs: check every step, never redo, decline every
/// confirmation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPrompter;

impl Prompter for AutoPrompter {
    fn before_step(&self, _id: u32, _label: &str) -> Result<StepChoice> {
        Ok(StepChoice::Check)
    }

    fn redo(&self, _id: u32, _label: &str) -> Result<bool> {
        Ok(false)
    }

    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Prompter backed by `dialoguer` on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn before_step(&self, id: u32, label: &str) -> Result<StepChoice> {
        let items = ["Check and run if needed", "Skip this step"];
        let selection = Select::with_theme(&self.theme)
            .with_prompt(format!("Step {id}: {label}"))
            .items(&items)
            .default(0)
            .interact()
            .with_context(|| format!("prompt for step {id}"))?;
        Ok(if selection == 0 {
            StepChoice::Check
        } else {
            StepChoice::Skip
        })
    }

    fn redo(&self, id: u32, label: &str) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(format!("Step {id} ({label}) is already done. Run it again?"))
            .default(false)
            .interact()
            .with_context(|| format!("prompt for step {id}"))
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(message)
            .default(false)
            .interact()
            .context("confirmation prompt")
    }
}
