//! Task configuration as declared in `task.yaml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::grader::GraderKind;

/// Default verification command used when a task declares no graders.
pub const DEFAULT_VERIFY_COMMAND: &str = "bash tests/test.sh";

fn default_weight() -> f64 {
    1.0
}

/// A single configured grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraderConfig {
    /// Runs a shell command in the workspace and scores by exit code or reward file.
    Deterministic {
        command: String,
        #[serde(default = "default_weight")]
        weight: f64,
    },
    /// Asks a remote text model to score the transcript against a rubric document.
    LlmRubric {
        /// Rubric path, relative to the task directory.
        rubric: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default = "default_weight")]
        weight: f64,
    },
}

impl GraderConfig {
    /// Creates a deterministic grader config.
    pub fn deterministic(command: impl Into<String>, weight: f64) -> Self {
        GraderConfig::Deterministic {
            command: command.into(),
            weight,
        }
    }

    /// Creates a rubric grader config.
    pub fn llm_rubric(rubric: impl Into<PathBuf>, model: Option<String>, weight: f64) -> Self {
        GraderConfig::LlmRubric {
            rubric: rubric.into(),
            model,
            weight,
        }
    }

    /// Returns the grader kind tag.
    pub fn kind(&self) -> GraderKind {
        match self {
            GraderConfig::Deterministic { .. } => GraderKind::Deterministic,
            GraderConfig::LlmRubric { .. } => GraderKind::LlmRubric,
        }
    }

    /// Returns the configured weight.
    pub fn weight(&self) -> f64 {
        match self {
            GraderConfig::Deterministic { weight, .. } | GraderConfig::LlmRubric { weight, .. } => {
                *weight
            }
        }
    }
}

/// Agent section of the task config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Wall-clock budget for the agent, in seconds.
    pub timeout_sec: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self { timeout_sec: 600 }
    }
}

/// Resource limits for the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// CPU cores available (e.g., 0.5, 1.0, 2.0).
    pub cpus: f64,
    /// Memory limit in megabytes.
    pub memory_mb: u64,
    /// Writable storage limit in megabytes.
    pub storage_mb: u64,
    /// Maximum time allowed for building the base image.
    pub build_timeout_sec: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_mb: 2048,
            storage_mb: 10240,
            build_timeout_sec: 600,
        }
    }
}

impl EnvironmentConfig {
    /// Returns memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_mb * 1024 * 1024) as i64
    }

    /// Returns CPU limit in nano-CPUs, the unit the Docker API expects.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }

    /// Returns the build timeout.
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_sec)
    }
}

/// Complete task configuration.
///
/// Loaded once per evaluation and shared read-only by every trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskConfig {
    /// Graders in declared order.
    pub graders: Vec<GraderConfig>,
    pub agent: AgentSection,
    pub environment: EnvironmentConfig,
}

impl TaskConfig {
    /// Parses a config from YAML text and validates it.
    pub fn from_yaml(content: &str) -> Result<Self, TaskError> {
        let mut config: TaskConfig = if content.trim().is_empty() {
            TaskConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        if config.graders.is_empty() {
            config
                .graders
                .push(GraderConfig::deterministic(DEFAULT_VERIFY_COMMAND, 1.0));
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns the agent timeout.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_sec)
    }

    /// Checks weights, commands and limits.
    pub fn validate(&self) -> Result<(), TaskError> {
        for (index, grader) in self.graders.iter().enumerate() {
            let weight = grader.weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(TaskError::InvalidGrader {
                    index,
                    reason: format!("weight must be a non-negative number, got {}", weight),
                });
            }
            match grader {
                GraderConfig::Deterministic { command, .. } if command.trim().is_empty() => {
                    return Err(TaskError::InvalidGrader {
                        index,
                        reason: "deterministic grader needs a command".to_string(),
                    });
                }
                GraderConfig::LlmRubric { rubric, .. } if rubric.as_os_str().is_empty() => {
                    return Err(TaskError::InvalidGrader {
                        index,
                        reason: "llm_rubric grader needs a rubric path".to_string(),
                    });
                }
                _ => {}
            }
        }

        if self.agent.timeout_sec == 0 {
            return Err(TaskError::InvalidAgent(
                "timeout_sec must be positive".to_string(),
            ));
        }

        if !self.environment.cpus.is_finite() || self.environment.cpus <= 0.0 {
            return Err(TaskError::InvalidEnvironment(format!(
                "cpus must be positive, got {}",
                self.environment.cpus
            )));
        }
        if self.environment.memory_mb == 0 {
            return Err(TaskError::InvalidEnvironment(
                "memory_mb must be positive".to_string(),
            ));
        }
        if self.environment.build_timeout_sec == 0 {
            return Err(TaskError::InvalidEnvironment(
                "build_timeout_sec must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
