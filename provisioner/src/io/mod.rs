//! I/O helpers: subprocesses, settings, prompts and on-disk state.

pub mod checkpoint;
pub mod cleanup;
pub mod config;
pub mod ddev;
pub mod lock;
pub mod prereqs;
pub mod process;
pub mod prompt;
