//! Per-trial session log.
//!
//! Every trial records an append-only, chronological sequence of entries:
//! the instruction delivered, each sandbox command, the agent's final output,
//! each grader result and the final reward. Failures are recorded as an
//! `agent_result` entry whose output starts with `Error:`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grader::GraderResult;
use crate::sandbox::CommandOutput;

/// One entry in a trial's session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionLogEntry {
    AgentStart {
        timestamp: DateTime<Utc>,
        instruction: String,
    },
    Command {
        timestamp: DateTime<Utc>,
        command: String,
        stdout: String,
        stderr: String,
        exit_code: i64,
    },
    AgentResult {
        timestamp: DateTime<Utc>,
        output: String,
    },
    Grader {
        timestamp: DateTime<Utc>,
        result: GraderResult,
    },
    Reward {
        timestamp: DateTime<Utc>,
        value: f64,
    },
}

impl SessionLogEntry {
    pub fn agent_start(instruction: impl Into<String>) -> Self {
        SessionLogEntry::AgentStart {
            timestamp: Utc::now(),
            instruction: instruction.into(),
        }
    }

    pub fn command(command: impl Into<String>, output: &CommandOutput) -> Self {
        SessionLogEntry::Command {
            timestamp: Utc::now(),
            command: command.into(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            exit_code: output.exit_code,
        }
    }

    pub fn agent_result(output: impl Into<String>) -> Self {
        SessionLogEntry::AgentResult {
            timestamp: Utc::now(),
            output: output.into(),
        }
    }

    /// Error text, recorded as an agent result.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::agent_result(format!("Error: {}", message))
    }

    pub fn grader(result: GraderResult) -> Self {
        SessionLogEntry::Grader {
            timestamp: Utc::now(),
            result,
        }
    }

    pub fn reward(value: f64) -> Self {
        SessionLogEntry::Reward {
            timestamp: Utc::now(),
            value,
        }
    }

    /// Timestamp of the entry.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionLogEntry::AgentStart { timestamp, .. }
            | SessionLogEntry::Command { timestamp, .. }
            | SessionLogEntry::AgentResult { timestamp, .. }
            | SessionLogEntry::Grader { timestamp, .. }
            | SessionLogEntry::Reward { timestamp, .. } => *timestamp,
        }
    }

    /// Returns true for `command` entries.
    pub fn is_command(&self) -> bool {
        matches!(self, SessionLogEntry::Command { .. })
    }

    /// Applies `f` to every free-text field of the entry.
    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            SessionLogEntry::AgentStart { instruction, .. } => *instruction = f(instruction),
            SessionLogEntry::Command {
                command,
                stdout,
                stderr,
                ..
            } => {
                *command = f(command);
                *stdout = f(stdout);
                *stderr = f(stderr);
            }
            SessionLogEntry::AgentResult { output, .. } => *output = f(output),
            SessionLogEntry::Grader { result, .. } => result.detail = f(&result.detail),
            SessionLogEntry::Reward { .. } => {}
        }
    }
}

/// Append-only log shared between the executor and the command runner.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: Mutex<Vec<SessionLogEntry>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionLogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an entry.
    pub fn push(&self, entry: SessionLogEntry) {
        self.lock().push(entry);
    }

    /// Copy of the entries so far.
    pub fn snapshot(&self) -> Vec<SessionLogEntry> {
        self.lock().clone()
    }

    /// Number of `command` entries.
    pub fn command_count(&self) -> usize {
        self.lock().iter().filter(|e| e.is_command()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Consumes the log.
    pub fn into_entries(self) -> Vec<SessionLogEntry> {
        self.entries.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::GraderKind;

    #[test]
    fn test_entry_serialization_tag() {
        let entry = SessionLogEntry::command("ls", &CommandOutput::new("a\n", "", 0));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["exit_code"], 0);

        let entry = SessionLogEntry::reward(0.5);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "reward");
        assert_eq!(json["value"], 0.5);
    }

    #[test]
    fn test_log_is_chronological_and_counts_commands() {
        let log = SessionLog::new();
        log.push(SessionLogEntry::agent_start("do it"));
        log.push(SessionLogEntry::command("echo 1", &CommandOutput::new("1", "", 0)));
        log.push(SessionLogEntry::command("false", &CommandOutput::new("", "", 1)));
        log.push(SessionLogEntry::agent_result("done"));

        assert_eq!(log.command_count(), 2);
        let entries = log.into_entries();
        assert_eq!(entries.len(), 4);
        assert!(entries
            .windows(2)
            .all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    #[test]
    fn test_map_text_covers_grader_detail() {
        let mut entry = SessionLogEntry::grader(GraderResult {
            kind: GraderKind::LlmRubric,
            score: 0.0,
            weight: 1.0,
            detail: "key=abc".to_string(),
        });
        entry.map_text(|s| s.replace("abc", "***"));
        match entry {
            SessionLogEntry::Grader { result, .. } => assert_eq!(result.detail, "key=***"),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_error_entry() {
        match SessionLogEntry::error("agent crashed") {
            SessionLogEntry::AgentResult { output, .. } => assert_eq!(output, "Error: agent crashed"),
            other => panic!("unexpected entry {:?}", other),
        }
    }
}
