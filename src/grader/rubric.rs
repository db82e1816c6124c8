//! Rubric grader backed by a remote text model.
//!
//! The grader condenses the session log into a transcript digest, pairs it with
//! the task's rubric document and asks the model for a JSON verdict of the form
//! `{"score": <0..1>, "reasoning": "..."}`. The first JSON object in the reply
//! is used; anything else scores 0.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{GraderError, LlmError};
use crate::llm::{select_provider, Credentials, GenerationRequest, LlmProvider, Message};
use crate::session::SessionLogEntry;
use crate::utils::extract_first_json_object;

use super::{clamp_unit, GradingContext, RubricBackend};

/// Per-field cap when building the digest.
const MAX_FIELD_CHARS: usize = 2000;
/// Cap on the whole digest.
const MAX_DIGEST_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = "You are a strict evaluator of software agent sessions. \
Judge only what the transcript shows. Reply with a single JSON object and nothing else.";

/// Grader that asks a remote model to score the transcript against a rubric.
#[derive(Debug, Clone)]
pub struct RubricGrader {
    /// Rubric path, relative to the task root.
    pub rubric: PathBuf,
    pub model: Option<String>,
    pub weight: f64,
    backend: RubricBackend,
}

impl RubricGrader {
    pub fn new(rubric: PathBuf, model: Option<String>, weight: f64, backend: RubricBackend) -> Self {
        Self {
            rubric,
            model,
            weight,
            backend,
        }
    }

    fn provider(&self) -> Result<Arc<dyn LlmProvider>, LlmError> {
        match &self.backend {
            RubricBackend::Fixed(provider) => Ok(provider.clone()),
            RubricBackend::Credentials(creds) => select_provider(creds).map(Arc::from),
            RubricBackend::FromEnv => select_provider(&Credentials::from_env()).map(Arc::from),
        }
    }

    pub(crate) async fn evaluate(
        &self,
        ctx: &GradingContext<'_>,
    ) -> Result<(f64, String), GraderError> {
        let rubric_path = ctx.task.root.join(&self.rubric);
        let rubric = tokio::fs::read_to_string(&rubric_path)
            .await
            .map_err(|e| GraderError::Rubric {
                path: rubric_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let provider = self.provider()?;
        let digest = transcript_digest(ctx.session);
        let request = GenerationRequest::new(
            self.model.clone().unwrap_or_default(),
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(build_prompt(&rubric, &digest)),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(1024);

        debug!(
            provider = provider.name(),
            model = self.model.as_deref().unwrap_or(provider.default_model()),
            digest_chars = digest.len(),
            "Requesting rubric verdict"
        );
        let response = provider.generate(request).await?;
        parse_verdict(&response.content)
    }
}

/// Embeds the rubric and digest into the grading prompt.
pub fn build_prompt(rubric: &str, digest: &str) -> String {
    format!(
        "## Rubric\n\n{}\n\n## Transcript\n\n{}\n\n## Response format\n\n\
Respond with a JSON object: {{\"score\": <number between 0 and 1>, \"reasoning\": \"<short justification>\"}}",
        rubric.trim(),
        digest
    )
}

/// Condenses command and agent-output entries into plain text.
pub fn transcript_digest(session: &[SessionLogEntry]) -> String {
    let mut digest = String::new();

    for entry in session {
        let section = match entry {
            SessionLogEntry::Command {
                command,
                stdout,
                stderr,
                exit_code,
                ..
            } => {
                let mut s = format!("$ {}\n[exit {}]\n", command, exit_code);
                if !stdout.trim().is_empty() {
                    s.push_str(truncate(stdout.trim(), MAX_FIELD_CHARS));
                    s.push('\n');
                }
                if !stderr.trim().is_empty() {
                    s.push_str("[stderr] ");
                    s.push_str(truncate(stderr.trim(), MAX_FIELD_CHARS));
                    s.push('\n');
                }
                s
            }
            SessionLogEntry::AgentResult { output, .. } => {
                format!("[agent output]\n{}\n", truncate(output.trim(), MAX_FIELD_CHARS))
            }
            _ => continue,
        };

        if digest.len() + section.len() > MAX_DIGEST_CHARS {
            digest.push_str("[transcript truncated]\n");
            break;
        }
        digest.push_str(&section);
        digest.push('\n');
    }

    if digest.is_empty() {
        digest.push_str("(no commands or agent output recorded)\n");
    }
    digest
}

/// Extracts `(score, reasoning)` from a model reply.
pub fn parse_verdict(content: &str) -> Result<(f64, String), GraderError> {
    let json = extract_first_json_object(content)
        .ok_or_else(|| GraderError::Response(format!("no JSON object in: {}", truncate(content, 200))))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| GraderError::Response(format!("invalid JSON: {}", e)))?;

    let score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| GraderError::Response("missing or non-numeric 'score'".to_string()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Ok((clamp_unit(score), reasoning))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::{Grader, GraderKind};
    use crate::llm::{GenerationResponse, Usage};
    use crate::sandbox::{CommandOutput, EnvVars, LocalProvider, Workspace};
    use crate::task::{Task, TaskConfig};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct ScriptedModel {
        reply: Result<String, u16>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<crate::llm::GenerationResponse, LlmError> {
            assert!(request.messages[1].content.contains("## Rubric"));
            match &self.reply {
                Ok(text) => Ok(GenerationResponse {
                    id: "1".into(),
                    model: "scripted-1".into(),
                    content: text.clone(),
                    usage: Usage::default(),
                }),
                Err(code) => Err(LlmError::ApiError {
                    code: *code,
                    message: "boom".into(),
                }),
            }
        }
    }

    #[test]
    fn test_parse_verdict() {
        let (score, reasoning) =
            parse_verdict("Here you go:\n{\"score\": 0.85, \"reasoning\": \"mostly right\"}").unwrap();
        assert!((score - 0.85).abs() < 1e-12);
        assert_eq!(reasoning, "mostly right");

        let (score, _) = parse_verdict("{\"score\": \"2\"}").unwrap();
        assert_eq!(score, 1.0);

        assert!(parse_verdict("I refuse").is_err());
        assert!(parse_verdict("{\"reasoning\": \"no score\"}").is_err());
    }

    #[test]
    fn test_digest_includes_commands_and_output() {
        let session = vec![
            SessionLogEntry::agent_start("secret instructions"),
            SessionLogEntry::command("ls", &CommandOutput::new("a.txt\n", "warn\n", 0)),
            SessionLogEntry::agent_result("finished"),
        ];
        let digest = transcript_digest(&session);
        assert!(digest.contains("$ ls"));
        assert!(digest.contains("a.txt"));
        assert!(digest.contains("[stderr] warn"));
        assert!(digest.contains("finished"));
        assert!(!digest.contains("secret instructions"));
    }

    async fn grade(backend: RubricBackend, write_rubric: bool) -> crate::grader::GraderResult {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("task");
        fs::create_dir_all(root.join("tests")).unwrap();
        if write_rubric {
            fs::write(root.join("tests/rubric.md"), "Award 1 if hello.txt exists.").unwrap();
        }
        let task = Task::new("rubric", &root, "", TaskConfig::default());
        let provider = LocalProvider::with_base_dir(temp.path().join("ws"));
        let ws = Workspace::directory("unused", temp.path());

        let grader = Grader::LlmRubric(RubricGrader::new(
            PathBuf::from("tests/rubric.md"),
            None,
            1.0,
            backend,
        ));
        let session = vec![SessionLogEntry::agent_result("wrote hello.txt")];
        let ctx = GradingContext {
            task: &task,
            workspace: &ws,
            provider: &provider,
            env: &EnvVars::new(),
            session: &session,
        };
        grader.grade(&ctx).await
    }

    #[tokio::test]
    async fn test_grade_with_model_verdict() {
        let backend = RubricBackend::Fixed(Arc::new(ScriptedModel {
            reply: Ok("```json\n{\"score\": 0.9, \"reasoning\": \"file present\"}\n```".into()),
        }));
        let result = grade(backend, true).await;
        assert_eq!(result.kind, GraderKind::LlmRubric);
        assert!((result.score - 0.9).abs() < 1e-12);
        assert_eq!(result.detail, "file present");
    }

    #[tokio::test]
    async fn test_failures_score_zero() {
        let api_error = RubricBackend::Fixed(Arc::new(ScriptedModel { reply: Err(401) }));
        let result = grade(api_error, true).await;
        assert_eq!(result.score, 0.0);
        assert!(result.detail.contains("401"));

        let garbage = RubricBackend::Fixed(Arc::new(ScriptedModel {
            reply: Ok("looks fine to me".into()),
        }));
        assert_eq!(grade(garbage, true).await.score, 0.0);

        let no_credentials = RubricBackend::Credentials(Credentials::default());
        let result = grade(no_credentials, true).await;
        assert_eq!(result.score, 0.0);
        assert!(result.detail.contains("ANTHROPIC_API_KEY"));

        let missing_rubric = RubricBackend::Fixed(Arc::new(ScriptedModel {
            reply: Ok("{\"score\": 1}".into()),
        }));
        let result = grade(missing_rubric, false).await;
        assert_eq!(result.score, 0.0);
        assert!(result.detail.contains("rubric.md"));
    }
}
