//! Task definitions.
//!
//! A task directory looks like:
//!
//! ```text
//! my-task/
//! ├── instruction.md        # what the agent sees
//! ├── task.yaml             # graders, agent timeout, resource limits
//! ├── environment/
//! │   └── Dockerfile        # base image for the container provider
//! ├── solution/solve.sh     # optional, used by the oracle agent
//! └── tests/                # verification scripts and rubrics
//! ```

pub mod config;

use std::path::{Path, PathBuf};

use crate::error::TaskError;

pub use config::{AgentSection, EnvironmentConfig, GraderConfig, TaskConfig};

/// Instruction file name inside a task directory.
pub const INSTRUCTION_FILE: &str = "instruction.md";
/// Config file name inside a task directory.
pub const TASK_CONFIG_FILE: &str = "task.yaml";

/// A loaded task.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task name, taken from the directory name.
    pub name: String,
    /// Absolute or caller-relative path to the task directory.
    pub root: PathBuf,
    /// Instruction delivered to the agent.
    pub instruction: String,
    /// Parsed configuration.
    pub config: TaskConfig,
}

impl Task {
    /// Creates a task from parts.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        instruction: impl Into<String>,
        config: TaskConfig,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            instruction: instruction.into(),
            config,
        }
    }

    /// Loads a task from its directory.
    pub fn load(dir: &Path) -> Result<Self, TaskError> {
        if !dir.is_dir() {
            return Err(TaskError::NotFound(dir.display().to_string()));
        }

        let instruction_path = dir.join(INSTRUCTION_FILE);
        if !instruction_path.is_file() {
            return Err(TaskError::MissingFile {
                path: instruction_path.display().to_string(),
            });
        }
        let instruction = std::fs::read_to_string(&instruction_path)?;

        let config_path = dir.join(TASK_CONFIG_FILE);
        let config = if config_path.is_file() {
            TaskConfig::from_yaml(&std::fs::read_to_string(&config_path)?)?
        } else {
            TaskConfig::from_yaml("")?
        };

        let name = dir
            .canonicalize()
            .unwrap_or_else(|_| dir.to_path_buf())
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "task".to_string());

        tracing::debug!(
            task = %name,
            graders = config.graders.len(),
            timeout_sec = config.agent.timeout_sec,
            "Loaded task"
        );

        Ok(Self {
            name,
            root: dir.to_path_buf(),
            instruction,
            config,
        })
    }
}
