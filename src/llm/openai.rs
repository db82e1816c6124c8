//! OpenAI-compatible chat-completions provider (secondary rubric provider).
//!
//! Works with any endpoint speaking the `/chat/completions` protocol.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

use super::{
    http_client, mask_key, with_retry, GenerationRequest, GenerationResponse, LlmProvider, Message,
    Usage,
};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the endpoint.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model to use if none specified.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Provider for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiProvider {
    /// Creates a provider against the public endpoint.
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Creates a provider against a custom endpoint.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Sets the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Get the API key (masked).
    pub fn api_key_masked(&self) -> String {
        mask_key(&self.api_key)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a single request (no retry logic).
    async fn execute_request(&self, request: &ApiRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(LlmError::RateLimited(error_response.error.message));
                }
                return Err(LlmError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(LlmError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        api_response.try_into()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        with_retry(self.name(), || self.execute_request(&api_request)).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<ApiResponse> for GenerationResponse {
    type Error = LlmError;

    fn try_from(response: ApiResponse) -> Result<Self, Self::Error> {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("Response has no message content".to_string()))?;

        Ok(GenerationResponse {
            id: response.id,
            model: response.model,
            content,
            usage: Usage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_with_base_url() {
        let provider = OpenAiProvider::with_base_url(
            "test-key".to_string(),
            "https://gateway.example.com/v1/".to_string(),
        )
        .unwrap()
        .with_model("local-model");

        assert_eq!(provider.base_url(), "https://gateway.example.com/v1");
        assert_eq!(provider.default_model(), "local-model");
        assert_eq!(provider.api_key_masked(), "********");
    }

    #[test]
    fn test_response_conversion() {
        let json = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        }"#;
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        let response = GenerationResponse::try_from(api).unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.usage.completion_tokens, 1);
    }

    #[test]
    fn test_response_without_choices_is_parse_error() {
        let api: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let result = GenerationResponse::try_from(api);
        assert!(matches!(result, Err(LlmError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let provider =
            OpenAiProvider::with_base_url("k".to_string(), "http://127.0.0.1:9".to_string())
                .unwrap();
        let request = GenerationRequest::new("", vec![Message::user("hi")]);
        let result = provider.generate(request).await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
