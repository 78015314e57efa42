//! HTTP client for OpenAI-compatible chat-completions endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, ToolCall, ToolDefinition};

/// Client for a configurable `{base_url}/chat/completions` endpoint.
///
/// Providers disagree on how they report errors inside a 2xx body; see
/// [`ApiErrorField`] for the shapes we normalize.
pub struct ChatClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        ChatClient {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let request = ApiRequest {
            model,
            messages,
            tools,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        tracing::debug!("chat completion request: model={}", model);

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::Parse(format!("{}, body: {}", e, body)))?;

        // Some providers put the error inside a 200 body.
        if let Some(error) = parsed.error {
            return Err(LlmError::Api(error.into_message()));
        }

        let choice = parsed.choices.into_iter().next().ok_or(LlmError::EmptyChoices)?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            finish_reason: choice.finish_reason,
        })
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    error: Option<ApiErrorField>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

/// The `error` field of a 2xx body, across provider variants: a bare string
/// or an object with a `message` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorField {
    Text(String),
    Object { message: String },
}

impl ApiErrorField {
    fn into_message(self) -> String {
        match self {
            ApiErrorField::Text(s) => s,
            ApiErrorField::Object { message } => message,
        }
    }
}
