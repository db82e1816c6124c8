//! Command-template agent.
//!
//! Runs one shell command built from a template such as
//! `my-agent --print {instruction}`. The `{instruction}` placeholder is
//! replaced with the instruction as a single shell-quoted word.

use async_trait::async_trait;
use tracing::debug;

use crate::sandbox::Workspace;

use super::{combined_output, Agent, AgentError, CommandRunner};

/// Placeholder substituted with the quoted instruction.
pub const INSTRUCTION_PLACEHOLDER: &str = "{instruction}";

/// Agent that runs a single templated command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    template: String,
}

impl CommandAgent {
    /// Creates an agent from a template containing `{instruction}`.
    pub fn new(template: impl Into<String>) -> Result<Self, AgentError> {
        let template = template.into();
        if !template.contains(INSTRUCTION_PLACEHOLDER) {
            return Err(AgentError::Config(format!(
                "command template must contain {}",
                INSTRUCTION_PLACEHOLDER
            )));
        }
        Ok(Self { template })
    }

    /// Builds the command line for an instruction.
    pub fn render(&self, instruction: &str) -> String {
        self.template
            .replace(INSTRUCTION_PLACEHOLDER, &shell_quote(instruction))
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(
        &self,
        instruction: &str,
        workspace: &Workspace,
        runner: &dyn CommandRunner,
    ) -> Result<String, AgentError> {
        let command = self.render(instruction);
        let output = runner.run(&command).await;
        debug!(workspace = %workspace.id, exit_code = output.exit_code, "Agent command finished");
        Ok(combined_output(&output))
    }
}

/// Quotes `s` as one POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
