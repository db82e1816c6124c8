//! Command-based grader.
//!
//! Runs a verification command in the workspace. Exit code 0 scores 1.0,
//! anything else 0.0. If the command leaves a parseable float in
//! [`REWARD_FILE`], that value (clamped to `[0, 1]`) wins over the exit code.

use tracing::debug;

use crate::error::GraderError;
use crate::sandbox::CommandOutput;

use super::{clamp_unit, GradingContext};

/// Reward file path, relative to the workspace working directory.
pub const REWARD_FILE: &str = "logs/verifier/reward.txt";

/// Maximum characters of command output kept in the detail string.
const DETAIL_OUTPUT_CHARS: usize = 1000;

/// Grader that scores by exit code or reward file.
#[derive(Debug, Clone)]
pub struct DeterministicGrader {
    pub command: String,
    pub weight: f64,
}

impl DeterministicGrader {
    pub fn new(command: impl Into<String>, weight: f64) -> Self {
        Self {
            command: command.into(),
            weight,
        }
    }

    pub(crate) async fn evaluate(
        &self,
        ctx: &GradingContext<'_>,
    ) -> Result<(f64, String), GraderError> {
        // A reward file left by an earlier grader or by the agent must not leak into this score.
        let reset = format!("mkdir -p logs/verifier && rm -f {}", REWARD_FILE);
        ctx.provider.run_command(ctx.workspace, &reset, ctx.env).await?;

        let output = ctx
            .provider
            .run_command(ctx.workspace, &self.command, ctx.env)
            .await?;
        let exit_score = if output.success() { 1.0 } else { 0.0 };

        let reward_file = ctx
            .provider
            .run_command(ctx.workspace, &format!("cat {}", REWARD_FILE), ctx.env)
            .await
            .ok()
            .filter(CommandOutput::success)
            .and_then(|out| parse_reward(&out.stdout));

        let (score, source) = match reward_file {
            Some(value) => (value, format!("reward file {}", value)),
            None => (exit_score, format!("exit code {}", output.exit_code)),
        };
        debug!(command = %self.command, exit_code = output.exit_code, score, "Verification finished");

        Ok((score, format_detail(&source, &output)))
    }
}

/// Parses reward file content. Returns `None` unless it holds a finite float.
pub fn parse_reward(content: &str) -> Option<f64> {
    content
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(clamp_unit)
}

fn format_detail(source: &str, output: &CommandOutput) -> String {
    let mut detail = format!("score from {}", source);
    let stdout = tail(&output.stdout, DETAIL_OUTPUT_CHARS);
    let stderr = tail(&output.stderr, DETAIL_OUTPUT_CHARS);
    if !stdout.is_empty() {
        detail.push_str("\nstdout:\n");
        detail.push_str(stdout);
    }
    if !stderr.is_empty() {
        detail.push_str("\nstderr:\n");
        detail.push_str(stderr);
    }
    detail
}

/// Last `max` characters of `s`, trimmed.
fn tail(s: &str, max: usize) -> &str {
    let s = s.trim();
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::{Grader, GraderKind};
    use crate::sandbox::{EnvVars, EnvironmentProvider, LocalProvider};
    use crate::task::{Task, TaskConfig};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_reward() {
        assert_eq!(parse_reward("0.3\n"), Some(0.3));
        assert_eq!(parse_reward("1.5"), Some(1.0));
        assert_eq!(parse_reward("-2"), Some(0.0));
        assert_eq!(parse_reward("nan"), None);
        assert_eq!(parse_reward("pass"), None);
        assert_eq!(parse_reward(""), None);
    }

    #[test]
    fn test_tail_is_char_safe() {
        assert_eq!(tail("  héllo  ", 3), "llo");
        assert_eq!(tail("short", 10), "short");
    }

    async fn grade_with(command: &str) -> crate::grader::GraderResult {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("task");
        fs::create_dir_all(&root).unwrap();
        let task = Task::new("grading", &root, "", TaskConfig::default());
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        let ws = provider
            .setup("g1", &task, &[], &EnvVars::new())
            .await
            .unwrap();

        let grader = Grader::Deterministic(DeterministicGrader::new(command, 1.0));
        let ctx = GradingContext {
            task: &task,
            workspace: &ws,
            provider: &provider,
            env: &EnvVars::new(),
            session: &[],
        };
        let result = grader.grade(&ctx).await;
        provider.cleanup("g1").await;
        result
    }

    #[tokio::test]
    async fn test_exit_code_scoring() {
        assert_eq!(grade_with("exit 0").await.score, 1.0);
        let failed = grade_with("echo nope >&2; exit 2").await;
        assert_eq!(failed.score, 0.0);
        assert!(failed.detail.contains("exit code 2"));
        assert!(failed.detail.contains("nope"));
    }

    #[tokio::test]
    async fn test_reward_file_overrides_exit_code() {
        let result = grade_with("echo 0.3 > logs/verifier/reward.txt; exit 0").await;
        assert_eq!(result.kind, GraderKind::Deterministic);
        assert!((result.score - 0.3).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unparsable_reward_file_falls_back() {
        let result = grade_with("echo garbage > logs/verifier/reward.txt; exit 0").await;
        assert_eq!(result.score, 1.0);
    }
}
