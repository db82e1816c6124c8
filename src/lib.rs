//! skill-forge: evaluation harness for agent skills.
//!
//! Runs an agent against a task repeatedly, each trial in a fresh sandbox
//! with optional skill bundles injected, grades every trial and aggregates
//! the rewards into pass rate, pass@k and pass^k. Comparing a run with
//! skills against a baseline gives the normalized gain the skills bring.

pub mod cli;
pub mod error;
pub mod grader;
pub mod llm;
pub mod metrics;
pub mod redact;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod session;
pub mod task;
pub mod utils;

// Re-export commonly used error types
pub use error::{GraderError, LlmError, ReportError, SandboxError, TaskError, TrialError};

pub use grader::{Grader, GraderKind, GraderResult};
pub use runner::{EvalOutcome, EvalReport, Evaluation, RunConfig, TrialResult};
pub use sandbox::{EnvironmentProvider, Provider, ProviderKind, Workspace};
pub use session::SessionLogEntry;
pub use task::Task;
