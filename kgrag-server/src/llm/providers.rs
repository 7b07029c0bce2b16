// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use super::{ChatMessage, ChatRequest, ChatResponse, LLMProvider};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client as OpenAIClient,
};
use kgrag_core::LlmError;
use serde_json::json;
use std::time::{Duration, Instant};

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout)
    } else {
        LlmError::Network(err.to_string())
    }
}

/// Map a non-success status to an error, reading the body for context.
async fn check_status(response: reqwest::Response, provider: &str) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimit);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Api(format!("{} returned {}: {}", provider, status, body)))
}

fn formatted_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect()
}

// OpenAI Provider
pub struct OpenAIProvider {
    client: OpenAIClient<OpenAIConfig>,
}

impl OpenAIProvider {
    /// `api_base` points the client at an OpenAI-compatible proxy.
    pub fn new(api_key: String, api_base: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        let client = OpenAIClient::with_config(config).with_http_client(http_client(timeout)?);
        Ok(Self { client })
    }

    /// Every pipeline prompt is sent as a single user turn.
    fn convert_messages(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .into_iter()
            .map(|msg| {
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .map(ChatCompletionRequestMessage::User)
                    .map_err(openai_error)
            })
            .collect()
    }
}

fn openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
        OpenAIError::JSONDeserialize(e) => LlmError::InvalidResponse(e.to_string()),
        OpenAIError::ApiError(e) if e.r#type.as_deref() == Some("rate_limit_exceeded") => {
            LlmError::RateLimit
        }
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait::async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let start = Instant::now();

        let body = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(self.convert_messages(request.messages)?)
            .temperature(request.temperature)
            .max_tokens(u16::try_from(request.max_tokens).unwrap_or(u16::MAX))
            .build()
            .map_err(openai_error)?;

        let response = self.client.chat().create(body).await.map_err(openai_error)?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_string()))?;
        let content = choice.message.content.clone().unwrap_or_default();
        let finish_reason = choice
            .finish_reason
            .as_ref()
            .map(|r| format!("{:?}", r).to_lowercase());

        Ok(ChatResponse {
            content,
            provider: "openai".to_string(),
            model: request.model,
            response_model: Some(response.model.clone()),
            input_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
            finish_reason,
            duration_ms: start.elapsed().as_millis() as u32,
        })
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

// Anthropic Provider
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            client: http_client(timeout)?,
            timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait::async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let start = Instant::now();

        let body = json!({
            "model": request.model,
            "messages": formatted_messages(&request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response, "Anthropic").await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing content[0].text".to_string()))?
            .to_string();

        Ok(ChatResponse {
            content,
            provider: "anthropic".to_string(),
            model: request.model,
            response_model: json["model"].as_str().map(|s| s.to_string()),
            input_tokens: json["usage"]["input_tokens"].as_u64().map(|t| t as u32),
            output_tokens: json["usage"]["output_tokens"].as_u64().map(|t| t as u32),
            finish_reason: json["stop_reason"].as_str().map(|s| s.to_string()),
            duration_ms: start.elapsed().as_millis() as u32,
        })
    }

    fn name(&self) -> &str {
        "Anthropic"
    }
}

// Ollama Provider (Local)
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl LLMProvider for OllamaProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let start = Instant::now();

        let body = json!({
            "model": request.model,
            "messages": formatted_messages(&request.messages),
            "stream": false,
            "options": { "temperature": request.temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response, "Ollama").await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing message.content".to_string()))?
            .to_string();

        Ok(ChatResponse {
            content,
            provider: "ollama".to_string(),
            model: request.model,
            response_model: json["model"].as_str().map(|s| s.to_string()),
            input_tokens: json["prompt_eval_count"].as_u64().map(|t| t as u32),
            output_tokens: json["eval_count"].as_u64().map(|t| t as u32),
            finish_reason: json["done_reason"].as_str().map(|s| s.to_string()),
            duration_ms: start.elapsed().as_millis() as u32,
        })
    }

    fn name(&self) -> &str {
        "Ollama"
    }
}
