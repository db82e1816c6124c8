//! Trial executor: drives one trial from workspace setup to cleanup.
//!
//! ```text
//! Setup ─► InstructionDelivery ─► AgentExecution ─► Grading ─► RewardComputation ─► Cleanup
//!   │               │                   │              │               ▲               ▲
//!   │               └───── error ───────┴──────────────┴───────────────┘               │
//!   └──────────────────────────── error ───────────────────────────────┘ (reward 0)    │
//!                                                        cleanup always runs, once ────┘
//! ```
//!
//! Every failure becomes a zero-reward [`TrialResult`]; nothing escapes to the
//! scheduler. Panics in provider, agent or grader code are caught and
//! classified like any other failure of that phase.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SandboxError, TrialError};
use crate::grader::{weighted_reward, Grader, GraderResult, GradingContext, RubricBackend};
use crate::metrics::MetricsCollector;
use crate::sandbox::{CommandOutput, EnvVars, EnvironmentProvider, Workspace};
use crate::session::{SessionLog, SessionLogEntry};
use crate::task::Task;

use super::agents::{Agent, CommandRunner};
use super::result::{outcome_label, TrialResult, TrialStatus};

/// Phases of a trial, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    Setup,
    InstructionDelivery,
    AgentExecution,
    Grading,
    RewardComputation,
    Cleanup,
}

/// [`CommandRunner`] that executes in a workspace and logs every call.
pub struct SandboxCommandRunner<'a> {
    provider: &'a dyn EnvironmentProvider,
    workspace: &'a Workspace,
    env: &'a EnvVars,
    log: &'a SessionLog,
}

impl<'a> SandboxCommandRunner<'a> {
    pub fn new(
        provider: &'a dyn EnvironmentProvider,
        workspace: &'a Workspace,
        env: &'a EnvVars,
        log: &'a SessionLog,
    ) -> Self {
        Self {
            provider,
            workspace,
            env,
            log,
        }
    }
}

#[async_trait]
impl CommandRunner for SandboxCommandRunner<'_> {
    async fn run(&self, command: &str) -> CommandOutput {
        let output = match self
            .provider
            .run_command(self.workspace, command, self.env)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(workspace = %self.workspace.id, error = %e, "Command could not be executed");
                CommandOutput::infrastructure_failure(e)
            }
        };
        self.log.push(SessionLogEntry::command(command, &output));
        output
    }
}

/// Runs single trials of one task with one agent.
pub struct TrialExecutor<'a> {
    task: &'a Task,
    provider: &'a dyn EnvironmentProvider,
    agent: &'a dyn Agent,
    graders: Vec<Grader>,
    skills: Vec<PathBuf>,
    secret_env: EnvVars,
    metrics: MetricsCollector,
}

impl<'a> TrialExecutor<'a> {
    /// Creates an executor with the task's graders and no skills or secrets.
    pub fn new(task: &'a Task, provider: &'a dyn EnvironmentProvider, agent: &'a dyn Agent) -> Self {
        Self {
            task,
            provider,
            agent,
            graders: Grader::for_task(task, &RubricBackend::default()),
            skills: Vec::new(),
            secret_env: EnvVars::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Sets the skill bundles injected into every workspace.
    pub fn with_skills(mut self, skills: Vec<PathBuf>) -> Self {
        self.skills = skills;
        self
    }

    /// Sets the secrets passed to every sandboxed command.
    pub fn with_secret_env(mut self, env: EnvVars) -> Self {
        self.secret_env = env;
        self
    }

    /// Rebuilds the graders with a specific rubric backend.
    pub fn with_rubric_backend(mut self, backend: &RubricBackend) -> Self {
        self.graders = Grader::for_task(self.task, backend);
        self
    }

    /// Runs trial `trial_id` (1-based) to completion. Never fails.
    pub async fn execute(&self, trial_id: u32) -> TrialResult {
        let start = Instant::now();
        let workspace_id = format!("t{}-{}", trial_id, &Uuid::new_v4().simple().to_string()[..12]);
        let log = SessionLog::new();
        self.metrics.trial_started();

        debug!(trial_id, phase = ?TrialPhase::Setup, workspace = %workspace_id, "Trial phase");
        let setup = AssertUnwindSafe(self.provider.setup(
            &workspace_id,
            self.task,
            &self.skills,
            &self.secret_env,
        ))
        .catch_unwind()
        .await;

        let (grader_results, failure) = match setup {
            Ok(Ok(workspace)) => self.run_in_workspace(trial_id, &workspace, &log).await,
            Ok(Err(e)) => (Vec::new(), Some(TrialError::SetupFailure(e))),
            Err(panic) => (
                Vec::new(),
                Some(TrialError::SetupFailure(SandboxError::Setup(format!(
                    "provider panicked: {}",
                    panic_message(panic.as_ref())
                )))),
            ),
        };

        debug!(trial_id, phase = ?TrialPhase::RewardComputation, "Trial phase");
        if let Some(err) = &failure {
            warn!(trial_id, error = %err, "Trial failed, reward forced to 0");
            log.push(SessionLogEntry::error(err));
        }
        let reward = match failure {
            Some(_) => 0.0,
            None => weighted_reward(&grader_results),
        };
        log.push(SessionLogEntry::reward(reward));

        debug!(trial_id, phase = ?TrialPhase::Cleanup, "Trial phase");
        if let Err(panic) = AssertUnwindSafe(self.provider.cleanup(&workspace_id))
            .catch_unwind()
            .await
        {
            warn!(
                trial_id,
                workspace = %workspace_id,
                panic = %panic_message(panic.as_ref()),
                "Workspace cleanup panicked"
            );
        }

        let duration_secs = start.elapsed().as_secs_f64();
        self.metrics.record_trial(
            &self.task.name,
            &self.provider.kind().to_string(),
            outcome_label(failure.as_ref()),
            reward,
            duration_secs,
        );
        info!(
            trial_id,
            reward,
            duration_secs,
            outcome = outcome_label(failure.as_ref()),
            "Trial finished"
        );

        let command_count = log.command_count();
        TrialResult {
            trial_id,
            status: if failure.is_some() {
                TrialStatus::Failed
            } else {
                TrialStatus::Completed
            },
            reward,
            grader_results,
            duration_secs,
            command_count,
            session_log: log.into_entries(),
            error: failure.map(|e| e.to_string()),
        }
    }

    /// Instruction delivery, agent execution and grading on a ready workspace.
    async fn run_in_workspace(
        &self,
        trial_id: u32,
        workspace: &Workspace,
        log: &SessionLog,
    ) -> (Vec<GraderResult>, Option<TrialError>) {
        debug!(trial_id, phase = ?TrialPhase::InstructionDelivery, workspace = %workspace, "Trial phase");
        log.push(SessionLogEntry::agent_start(&self.task.instruction));

        debug!(trial_id, phase = ?TrialPhase::AgentExecution, "Trial phase");
        match self.run_agent(workspace, log).await {
            Ok(output) => log.push(SessionLogEntry::agent_result(output)),
            Err(e) => return (Vec::new(), Some(e)),
        }

        debug!(trial_id, phase = ?TrialPhase::Grading, graders = self.graders.len(), "Trial phase");
        let mut results = Vec::with_capacity(self.graders.len());
        for grader in &self.graders {
            let session = log.snapshot();
            let ctx = GradingContext {
                task: self.task,
                workspace,
                provider: self.provider,
                env: &self.secret_env,
                session: &session,
            };
            match AssertUnwindSafe(grader.grade(&ctx)).catch_unwind().await {
                Ok(result) => {
                    self.metrics
                        .record_grader(&result.kind.to_string(), result.score);
                    log.push(SessionLogEntry::grader(result.clone()));
                    results.push(result);
                }
                Err(panic) => {
                    let err = TrialError::Grading(format!(
                        "{} grader panicked: {}",
                        grader.kind(),
                        panic_message(panic.as_ref())
                    ));
                    return (results, Some(err));
                }
            }
        }

        (results, None)
    }

    /// Runs the agent under the task timeout.
    async fn run_agent(&self, workspace: &Workspace, log: &SessionLog) -> Result<String, TrialError> {
        let timeout = self.task.config.agent_timeout();
        let runner = SandboxCommandRunner::new(self.provider, workspace, &self.secret_env, log);
        let agent_run = AssertUnwindSafe(self.agent.run(&self.task.instruction, workspace, &runner))
            .catch_unwind();

        match tokio::time::timeout(timeout, agent_run).await {
            Err(_) => Err(TrialError::AgentTimeout(timeout)),
            Ok(Err(panic)) => Err(TrialError::AgentExecution(format!(
                "agent panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(Err(e))) => Err(TrialError::AgentExecution(e.to_string())),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
