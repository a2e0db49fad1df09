//! `OpenAI` chat-completions provider implementation

use super::types::{ChatCompletion, ChatRequest, Choice, FunctionSpec, Message, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `OpenAI`-compatible chat-completions service
pub struct OpenAIService {
    client: Client,
    api_key: String,
    endpoint: String,
    model_id: String,
}

impl OpenAIService {
    /// Build a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// No request timeout is set; callers own cancellation.
    pub fn new(api_key: String, model: &str, base_url: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model_id: model.to_string(),
        })
    }

    fn translate_request(request: &ChatRequest) -> OpenAIRequest<'_> {
        OpenAIRequest {
            model: &request.model,
            temperature: request.temperature,
            messages: &request.messages,
            functions: if request.functions.is_empty() {
                None
            } else {
                Some(request.functions.as_slice())
            },
        }
    }

    fn normalize_response(resp: OpenAIResponse) -> ChatCompletion {
        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        ChatCompletion {
            choices: resp
                .choices
                .into_iter()
                .map(|c| Choice {
                    message: c.message,
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage,
        }
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let openai_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
                Ok(error_resp) => error_resp.error.message,
                Err(_) => format!("Request failed with status code {}", status.as_u16()),
            };
            return Err(LlmError::from_status(status.as_u16(), message, body));
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Ok(Self::normalize_response(openai_response))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<&'a [FunctionSpec]>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
