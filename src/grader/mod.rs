//! Trial grading.
//!
//! A task declares an ordered list of graders. Each one scores the finished
//! workspace in `[0, 1]` and carries a weight; the trial reward is the
//! weighted mean of the scores.
//!
//! Two realizations exist, selected by the config tag:
//!
//! | Tag             | Realization            | Score source                         |
//! |-----------------|------------------------|--------------------------------------|
//! | `deterministic` | [`DeterministicGrader`] | exit code, overridden by reward file |
//! | `llm_rubric`    | [`RubricGrader`]        | remote model verdict on a rubric     |
//!
//! Grading never fails: internal errors become a zero score with the error as
//! detail.

pub mod deterministic;
pub mod rubric;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GraderError;
use crate::llm::{Credentials, LlmProvider};
use crate::sandbox::{EnvVars, EnvironmentProvider, Workspace};
use crate::session::SessionLogEntry;
use crate::task::{GraderConfig, Task};

pub use deterministic::{DeterministicGrader, REWARD_FILE};
pub use rubric::RubricGrader;

/// Grader kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderKind {
    Deterministic,
    LlmRubric,
}

impl fmt::Display for GraderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraderKind::Deterministic => write!(f, "deterministic"),
            GraderKind::LlmRubric => write!(f, "llm_rubric"),
        }
    }
}

/// Outcome of one grader on one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderResult {
    pub kind: GraderKind,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Configured weight.
    pub weight: f64,
    /// Free-text diagnostic.
    pub detail: String,
}

impl GraderResult {
    /// Creates a result, clamping the score into `[0, 1]`. NaN becomes 0.
    pub fn new(kind: GraderKind, score: f64, weight: f64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            score: clamp_unit(score),
            weight,
            detail: detail.into(),
        }
    }

    /// Zero-score result for a grader that failed internally.
    pub fn failed(kind: GraderKind, weight: f64, error: impl fmt::Display) -> Self {
        Self::new(kind, 0.0, weight, error.to_string())
    }
}

/// Everything a grader may look at.
pub struct GradingContext<'a> {
    pub task: &'a Task,
    pub workspace: &'a Workspace,
    pub provider: &'a dyn EnvironmentProvider,
    /// Environment passed to grader commands (secrets included).
    pub env: &'a EnvVars,
    /// Session log of the trial so far.
    pub session: &'a [SessionLogEntry],
}

/// How rubric graders obtain their model provider.
#[derive(Clone, Default)]
pub enum RubricBackend {
    /// Select primary/secondary from these credentials at grading time.
    #[default]
    FromEnv,
    Credentials(Credentials),
    /// Always use this provider.
    Fixed(Arc<dyn LlmProvider>),
}

impl fmt::Debug for RubricBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RubricBackend::FromEnv => write!(f, "FromEnv"),
            RubricBackend::Credentials(_) => write!(f, "Credentials(..)"),
            RubricBackend::Fixed(p) => write!(f, "Fixed({})", p.name()),
        }
    }
}

/// Closed set of grader realizations.
#[derive(Debug)]
pub enum Grader {
    Deterministic(DeterministicGrader),
    LlmRubric(RubricGrader),
}

impl Grader {
    /// Builds the grader for a config entry.
    pub fn from_config(config: &GraderConfig, backend: &RubricBackend) -> Self {
        match config {
            GraderConfig::Deterministic { command, weight } => {
                Grader::Deterministic(DeterministicGrader::new(command.clone(), *weight))
            }
            GraderConfig::LlmRubric {
                rubric,
                model,
                weight,
            } => Grader::LlmRubric(RubricGrader::new(
                rubric.clone(),
                model.clone(),
                *weight,
                backend.clone(),
            )),
        }
    }

    /// Builds every grader of a task, in declared order.
    pub fn for_task(task: &Task, backend: &RubricBackend) -> Vec<Grader> {
        task.config
            .graders
            .iter()
            .map(|c| Grader::from_config(c, backend))
            .collect()
    }

    pub fn kind(&self) -> GraderKind {
        match self {
            Grader::Deterministic(_) => GraderKind::Deterministic,
            Grader::LlmRubric(_) => GraderKind::LlmRubric,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Grader::Deterministic(g) => g.weight,
            Grader::LlmRubric(g) => g.weight,
        }
    }

    /// Scores the trial. Never fails.
    pub async fn grade(&self, ctx: &GradingContext<'_>) -> GraderResult {
        let outcome: Result<(f64, String), GraderError> = match self {
            Grader::Deterministic(g) => g.evaluate(ctx).await,
            Grader::LlmRubric(g) => g.evaluate(ctx).await,
        };

        match outcome {
            Ok((score, detail)) => {
                let result = GraderResult::new(self.kind(), score, self.weight(), detail);
                debug!(grader = %result.kind, score = result.score, "Grader finished");
                result
            }
            Err(e) => {
                warn!(grader = %self.kind(), error = %e, "Grader failed, scoring 0");
                GraderResult::failed(self.kind(), self.weight(), e)
            }
        }
    }
}

/// Weighted mean of grader scores.
///
/// Returns 0 when the total weight is 0 (or not a finite positive number).
pub fn weighted_reward(results: &[GraderResult]) -> f64 {
    let total_weight: f64 = results.iter().map(|r| r.weight).sum();
    if !total_weight.is_finite() || total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = results.iter().map(|r| r.score * r.weight).sum();
    clamp_unit(weighted / total_weight)
}

/// Clamps into `[0, 1]`, mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
