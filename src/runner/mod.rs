//! Trial execution and evaluation runs.
//!
//! # Architecture
//!
//! ```text
//! Evaluation ─► TrialScheduler ─► TrialExecutor ×N ─► EvalReport ─► Redactor ─► report file
//!                 (≤ parallel)      setup / agent / grade / cleanup
//! ```
//!
//! A trial never fails the run: every error is folded into a zero-reward
//! [`TrialResult`], and the workspace is cleaned up on every path.
//!
//! # Example
//!
//! ```ignore
//! use skill_forge::runner::{Evaluation, OracleAgent, RunConfig};
//! use skill_forge::sandbox::LocalProvider;
//! use skill_forge::task::Task;
//!
//! let task = Task::load(Path::new("./tasks/pdf-extract"))?;
//! let config = RunConfig::new().with_trials(5).with_parallel(2).with_skill("./skills/pdf");
//! let outcome = Evaluation::new(task, config)
//!     .run(&LocalProvider::new(), &OracleAgent::new())
//!     .await;
//!
//! println!("pass rate: {:.2}", outcome.report.pass_rate);
//! ```

pub mod agents;
pub mod config;
pub mod evaluation;
pub mod executor;
pub mod result;
pub mod scheduler;

pub use agents::{
    create_agent, Agent, AgentError, AgentType, CommandAgent, CommandRunner, OracleAgent,
};
pub use config::{RunConfig, DEFAULT_REDACTION_MIN_LENGTH};
pub use evaluation::{EvalOutcome, Evaluation};
pub use executor::{SandboxCommandRunner, TrialExecutor, TrialPhase};
pub use result::{outcome_label, EvalReport, ReportMeta, TrialResult, TrialStatus};
pub use scheduler::TrialScheduler;
