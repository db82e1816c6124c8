//! Agents driven inside a trial workspace.
//!
//! An agent receives the task instruction, a handle to its workspace and a
//! [`CommandRunner`]. It runs whatever commands it needs through the runner
//! and returns its accumulated text output. Failing commands are not errors:
//! the agent sees them through the returned [`CommandOutput`].
//!
//! The executor owns the timeout; agents never need to track time themselves.

pub mod command;
pub mod oracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sandbox::{CommandOutput, Workspace};

pub use command::CommandAgent;
pub use oracle::OracleAgent;

/// Supported agent types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Runs the task's reference solution.
    #[default]
    Oracle,
    /// Runs a user-supplied command template.
    Command,
}

impl AgentType {
    /// Returns the display name for this agent type.
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::Oracle => "oracle",
            AgentType::Command => "command",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "oracle" => Ok(AgentType::Oracle),
            "command" | "cmd" => Ok(AgentType::Command),
            other => Err(format!("Unknown agent type: {}", other)),
        }
    }
}

/// Executes commands in the trial workspace on behalf of an agent.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `sh -c <command>` and waits for it.
    ///
    /// If the command could not be started at all, the output has exit code 1
    /// and a diagnostic on stderr.
    async fn run(&self, command: &str) -> CommandOutput;
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// An agent under evaluation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name recorded in reports.
    fn name(&self) -> &str;

    /// Works on the instruction and returns the agent's text output.
    async fn run(
        &self,
        instruction: &str,
        workspace: &Workspace,
        runner: &dyn CommandRunner,
    ) -> Result<String, AgentError>;
}

/// Creates an agent for the given type.
///
/// `command_template` is required for [`AgentType::Command`].
pub fn create_agent(
    agent_type: AgentType,
    command_template: Option<String>,
) -> Result<Box<dyn Agent>, AgentError> {
    match agent_type {
        AgentType::Oracle => Ok(Box::new(OracleAgent::new())),
        AgentType::Command => {
            let template = command_template.ok_or_else(|| {
                AgentError::Config("the command agent needs a command template".to_string())
            })?;
            Ok(Box::new(CommandAgent::new(template)?))
        }
    }
}

/// Joins stdout and stderr into one text block.
pub(crate) fn combined_output(output: &CommandOutput) -> String {
    match (output.stdout.trim().is_empty(), output.stderr.trim().is_empty()) {
        (_, true) => output.stdout.clone(),
        (true, false) => output.stderr.clone(),
        (false, false) => format!("{}\n{}", output.stdout.trim_end(), output.stderr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_parse() {
        assert_eq!("oracle".parse::<AgentType>().unwrap(), AgentType::Oracle);
        assert_eq!("CMD".parse::<AgentType>().unwrap(), AgentType::Command);
        assert!("claude".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_create_agent() {
        assert_eq!(create_agent(AgentType::Oracle, None).unwrap().name(), "oracle");
        assert!(matches!(
            create_agent(AgentType::Command, None),
            Err(AgentError::Config(_))
        ));
        let agent = create_agent(AgentType::Command, Some("echo {instruction}".into())).unwrap();
        assert_eq!(agent.name(), "command");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(combined_output(&CommandOutput::new("out\n", "", 0)), "out\n");
        assert_eq!(combined_output(&CommandOutput::new("", "err", 1)), "err");
        assert_eq!(combined_output(&CommandOutput::new("out\n", "err", 1)), "out\nerr");
    }
}
