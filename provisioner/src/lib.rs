//! Idempotent, resumable provisioner for a DDEV-hosted Drupal site.
//!
//! A fixed table of steps is walked in order. Each step pairs a read-only probe
//! ("is this already done?") with an action that is safe to run again, so an
//! interrupted run can simply be started over. The crate keeps a strict split:
//!
//! - **[`core`]**: pure logic (name derivation, tool-output parsing, the step
//!   state machine, the run report). No I/O.
//! - **[`io`]**: side effects (subprocesses, settings, prompts, lock and
//!   checkpoint files, cleanup).
//!
//! [`steps`] defines the table, [`orchestrator`] drives it and [`provision`]
//! wires a whole run together for the binary.

pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod provision;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
