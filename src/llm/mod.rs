//! Remote text-generation clients used by the rubric grader.
//!
//! Two independently configured providers exist:
//!
//! - [`AnthropicProvider`] (primary): the Messages API, configured by
//!   `ANTHROPIC_API_KEY` and optionally `ANTHROPIC_BASE_URL`.
//! - [`OpenAiProvider`] (secondary): any OpenAI-compatible chat-completions
//!   endpoint, configured by `OPENAI_API_KEY` and optionally `OPENAI_BASE_URL`.
//!
//! [`select_provider`] returns the primary when its credential is present and
//! the secondary otherwise. It never falls through from one to the other after
//! a request has been made.
//!
//! ```ignore
//! use skill_forge::llm::{select_provider, Credentials, GenerationRequest, Message};
//!
//! let provider = select_provider(&Credentials::from_env())?;
//! let request = GenerationRequest::new("", vec![Message::user("Score this")]);
//! let response = provider.generate(request).await?;
//! ```

pub mod anthropic;
pub mod openai;

use std::env;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty means the provider's default.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated text.
    pub content: String,
    pub usage: Usage,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Trait for providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name used in logs and grader details.
    fn name(&self) -> &'static str;

    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;

    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Credentials and endpoints for both rubric providers.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
}

impl Credentials {
    /// Reads credentials from the environment. Empty values count as unset.
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            anthropic_api_key: var(anthropic::API_KEY_ENV),
            anthropic_base_url: var(anthropic::BASE_URL_ENV),
            openai_api_key: var(openai::API_KEY_ENV),
            openai_base_url: var(openai::BASE_URL_ENV),
        }
    }
}

/// Picks the rubric provider: primary if its key is set, else secondary.
///
/// # Errors
///
/// `LlmError::NoProviderConfigured` when neither key is set.
pub fn select_provider(credentials: &Credentials) -> Result<Box<dyn LlmProvider>, LlmError> {
    if let Some(key) = &credentials.anthropic_api_key {
        let base_url = credentials
            .anthropic_base_url
            .clone()
            .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string());
        return Ok(Box::new(AnthropicProvider::with_base_url(
            key.clone(),
            base_url,
        )?));
    }

    if let Some(key) = &credentials.openai_api_key {
        let base_url = credentials
            .openai_base_url
            .clone()
            .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());
        return Ok(Box::new(OpenAiProvider::with_base_url(key.clone(), base_url)?));
    }

    Err(LlmError::NoProviderConfigured)
}

/// Builds the HTTP client shared by both providers.
pub(crate) fn http_client() -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))
}

/// Masks an API key for debug output.
pub(crate) fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Check if an error is transient and should be retried.
fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("temporarily")
                || msg.contains("Connection refused")
        }
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

/// Runs `op` with exponential backoff on transient failures.
pub(crate) async fn with_retry<F, Fut>(provider: &str, mut op: F) -> Result<GenerationResponse, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<GenerationResponse, LlmError>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            // 1s, 2s
            let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            tracing::debug!(
                provider,
                attempt = attempt + 1,
                delay_ms,
                "Retrying request after transient failure"
            );
        }

        match op().await {
            Ok(response) => return Ok(response),
            Err(err) if is_transient_error(&err) => {
                tracing::warn!(
                    provider,
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    error = %err,
                    "Transient error, will retry"
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LlmError::RequestFailed("Max retries exceeded with no error captured".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_select_prefers_primary() {
        let creds = Credentials {
            anthropic_api_key: Some("sk-ant-test".into()),
            openai_api_key: Some("sk-openai-test".into()),
            ..Default::default()
        };
        let provider = select_provider(&creds).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_select_falls_back_to_secondary() {
        let creds = Credentials {
            openai_api_key: Some("sk-openai-test".into()),
            openai_base_url: Some("http://localhost:9999/v1".into()),
            ..Default::default()
        };
        let provider = select_provider(&creds).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_select_without_credentials() {
        let result = select_provider(&Credentials::default());
        assert!(matches!(result, Err(LlmError::NoProviderConfigured)));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abc"), "***");
        assert_eq!(mask_key("sk-1234567890abcdef"), "sk-1...cdef");
    }

    #[test]
    fn test_mask_key_non_ascii() {
        assert_eq!(mask_key("ключ-секрет-ключ"), "ключ...ключ");
        assert_eq!(mask_key("пароль"), "******");
    }

    #[test]
    fn test_is_transient_error() {
        assert!(is_transient_error(&LlmError::RateLimited("slow down".into())));
        assert!(is_transient_error(&LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }));
        assert!(!is_transient_error(&LlmError::ApiError {
            code: 401,
            message: "bad key".into()
        }));
        assert!(!is_transient_error(&LlmError::ParseError("bad".into())));
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::ApiError {
                    code: 400,
                    message: "bad request".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
