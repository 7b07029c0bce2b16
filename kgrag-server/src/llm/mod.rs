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

//! Chat-completion providers and the prompt-level client built on them.

use crate::config::{LLMConfig, ProviderKind};
use async_trait::async_trait;
use kgrag_core::{LanguageModel, LlmError};
use kgrag_prompts::{PromptBindings, PromptTemplate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

mod providers;
pub use providers::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: String,               // e.g., "openai", "anthropic"
    pub model: String,                  // Requested model
    pub response_model: Option<String>, // Actual model used (from response)
    pub input_tokens: Option<u32>,      // Prompt tokens
    pub output_tokens: Option<u32>,     // Completion tokens
    pub finish_reason: Option<String>,  // stop/length/tool_calls
    pub duration_ms: u32,
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    fn name(&self) -> &str;
}

/// Construct the provider selected in configuration.
pub fn build_provider(config: &LLMConfig) -> anyhow::Result<Arc<dyn LLMProvider>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let provider: Arc<dyn LLMProvider> = match config.provider {
        ProviderKind::OpenAI => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
            Arc::new(OpenAIProvider::new(key, config.openai_api_base.clone(), timeout)?)
        }
        ProviderKind::Anthropic => {
            let key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;
            Arc::new(AnthropicProvider::new(key, timeout)?)
        }
        ProviderKind::Ollama => {
            let base_url = config
                .ollama_base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Arc::new(OllamaProvider::new(base_url, timeout)?)
        }
    };
    info!(provider = provider.name(), model = %config.model, "Initialized LLM provider");
    Ok(provider)
}

/// [`LanguageModel`] that renders a template into a single user message.
pub struct LLMClient {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl LLMClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &LLMConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LanguageModel for LLMClient {
    async fn complete(
        &self,
        template: &PromptTemplate,
        bindings: &PromptBindings,
    ) -> Result<String, LlmError> {
        let prompt = template.render(bindings)?;
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = tokio::time::timeout(self.timeout, self.provider.chat(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        debug!(
            prompt = %template.name,
            version = %template.version,
            provider = %response.provider,
            model = ?response.response_model,
            input_tokens = ?response.input_tokens,
            output_tokens = ?response.output_tokens,
            finish_reason = ?response.finish_reason,
            duration_ms = response.duration_ms,
            "LLM call completed"
        );

        if response.content.trim().is_empty() {
            return Err(LlmError::InvalidResponse(format!(
                "{} returned an empty completion",
                response.provider
            )));
        }
        Ok(response.content)
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}
