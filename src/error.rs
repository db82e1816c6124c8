//! Error types for skill-forge operations.
//!
//! Defines error types for each subsystem:
//! - Task loading and validation
//! - Sandbox provisioning and command execution
//! - Remote text-generation calls used by rubric grading
//! - Per-trial failure classification
//! - Report persistence

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading a task directory.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task directory '{0}' not found")]
    NotFound(String),

    #[error("Missing required file '{path}'")]
    MissingFile { path: String },

    #[error("Invalid grader configuration at index {index}: {reason}")]
    InvalidGrader { index: usize, reason: String },

    #[error("Invalid environment configuration: {0}")]
    InvalidEnvironment(String),

    #[error("Invalid agent configuration: {0}")]
    InvalidAgent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised by an environment provider.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Image build timed out after {0:?}")]
    BuildTimeout(Duration),

    #[error("Sandbox runtime not available: {0}")]
    RuntimeUnavailable(String),

    #[error("Command could not be started: {0}")]
    Execution(String),

    #[error("Workspace '{0}' is not active")]
    UnknownWorkspace(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during remote text-generation calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("No rubric grading provider is configured (set ANTHROPIC_API_KEY or OPENAI_API_KEY)")]
    NoProviderConfigured,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Internal grader failures.
///
/// These never leave the grader boundary: `Grader::grade` turns every one of
/// them into a zero-score `GraderResult` carrying the message as detail.
#[derive(Debug, Error)]
pub enum GraderError {
    #[error("Verification command could not run: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Failed to read rubric '{path}': {reason}")]
    Rubric { path: String, reason: String },

    #[error("Rubric model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Unparsable rubric response: {0}")]
    Response(String),
}

/// Classification of a failed trial.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("Setup failure: {0}")]
    SetupFailure(#[source] SandboxError),

    #[error("Agent timed out after {0:?}")]
    AgentTimeout(Duration),

    #[error("Agent execution error: {0}")]
    AgentExecution(String),

    #[error("Grading error: {0}")]
    Grading(String),
}

/// Errors that can occur while persisting or loading reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to create report directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_error_display() {
        let err = TrialError::AgentTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Agent timed out after 30s");

        let err = TrialError::SetupFailure(SandboxError::BuildFailed("no Dockerfile".into()));
        assert!(err.to_string().contains("no Dockerfile"));
    }

    #[test]
    fn test_grader_error_from_llm() {
        let err: GraderError = LlmError::NoProviderConfigured.into();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::InvalidGrader {
            index: 2,
            reason: "negative weight".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid grader configuration at index 2: negative weight"
        );
    }
}
