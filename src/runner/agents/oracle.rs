//! Oracle agent: runs the task's reference solution.
//!
//! Useful for checking that a task and its graders agree before spending
//! model time on it. A task without `solution/solve.sh` simply scores 0.

use async_trait::async_trait;
use tracing::debug;

use crate::sandbox::Workspace;

use super::{combined_output, Agent, AgentError, CommandRunner};

/// Command the oracle runs, relative to the workspace root.
pub const SOLUTION_COMMAND: &str = "bash solution/solve.sh";

#[derive(Debug, Clone, Default)]
pub struct OracleAgent;

impl OracleAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for OracleAgent {
    fn name(&self) -> &str {
        "oracle"
    }

    async fn run(
        &self,
        _instruction: &str,
        workspace: &Workspace,
        runner: &dyn CommandRunner,
    ) -> Result<String, AgentError> {
        let output = runner.run(SOLUTION_COMMAND).await;
        debug!(workspace = %workspace.id, exit_code = output.exit_code, "Reference solution finished");
        Ok(combined_output(&output))
    }
}
