//! Deterministic, pure logic for the provisioner.
//!
//! Core modules must be free of I/O side effects. They decide transitions,
//! interpret tool output and build reports from in-memory values.

pub mod machine;
pub mod naming;
pub mod parse;
pub mod report;
pub mod types;
