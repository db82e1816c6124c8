//! One evaluation run: N trials of a task, aggregated into a report.

use std::path::PathBuf;

use tracing::{error, info};

use crate::grader::RubricBackend;
use crate::redact::Redactor;
use crate::report::persist_report;
use crate::sandbox::{skill_names, EnvironmentProvider};
use crate::task::Task;

use super::agents::Agent;
use super::config::RunConfig;
use super::executor::TrialExecutor;
use super::result::{EvalReport, ReportMeta};
use super::scheduler::TrialScheduler;

/// Result of [`Evaluation::run`].
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    /// Redacted report.
    pub report: EvalReport,
    /// Where the report was written, if persistence was enabled and succeeded.
    pub report_path: Option<PathBuf>,
}

/// Runs a task several times and aggregates the outcome.
#[derive(Debug)]
pub struct Evaluation {
    task: Task,
    config: RunConfig,
    rubric_backend: RubricBackend,
}

impl Evaluation {
    pub fn new(task: Task, config: RunConfig) -> Self {
        Self {
            task,
            config,
            rubric_backend: RubricBackend::default(),
        }
    }

    /// Overrides how rubric graders reach a model.
    pub fn with_rubric_backend(mut self, backend: RubricBackend) -> Self {
        self.rubric_backend = backend;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs every trial, then aggregates, redacts and persists the report.
    ///
    /// Individual trial failures only lower the score; a report write failure
    /// is logged and leaves `report_path` empty. The provider is shut down
    /// before returning.
    ///
    /// Dropping this future mid-run skips per-trial cleanup for the trials
    /// still in flight.
    pub async fn run(&self, provider: &dyn EnvironmentProvider, agent: &dyn Agent) -> EvalOutcome {
        let secret_env = self.config.resolve_secret_env();
        let executor = TrialExecutor::new(&self.task, provider, agent)
            .with_skills(self.config.skills.clone())
            .with_secret_env(secret_env.clone())
            .with_rubric_backend(&self.rubric_backend);

        info!(
            task = %self.task.name,
            provider = %provider.kind(),
            agent = agent.name(),
            trials = self.config.trials,
            parallel = self.config.parallel,
            skills = self.config.skills.len(),
            "Starting evaluation"
        );

        let scheduler = TrialScheduler::new(self.config.trials, self.config.parallel);
        let trials = scheduler.run(|trial_id| executor.execute(trial_id)).await;

        let meta = ReportMeta {
            task: self.task.name.clone(),
            provider: provider.kind(),
            agent: agent.name().to_string(),
            parallel: self.config.parallel,
            k: self.config.k,
            skills_used: skill_names(&self.config.skills),
        };
        let report = EvalReport::assemble(meta, trials);
        let report = Redactor::new(secret_env.values(), self.config.redaction_min_length)
            .redact_report(&report);

        info!(
            task = %report.task,
            pass_rate = report.pass_rate,
            successes = report.successes,
            failed = report.failed_trials(),
            "Evaluation finished"
        );

        let report_path = if self.config.persist {
            match persist_report(&report, &self.config.output_dir).await {
                Ok(path) => Some(path),
                Err(e) => {
                    error!(dir = %self.config.output_dir.display(), error = %e, "Failed to write report");
                    None
                }
            }
        } else {
            None
        };

        provider.shutdown().await;

        EvalOutcome {
            report,
            report_path,
        }
    }
}
