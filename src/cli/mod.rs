//! Command-line interface for skill-forge.
//!
//! Provides the `run` command for evaluating a task and the `compare`
//! command for measuring the gain skills bring over a baseline.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
