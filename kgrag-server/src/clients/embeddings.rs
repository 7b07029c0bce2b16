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

use crate::config::EmbeddingsConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from embedding clients
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns text into the vectors the document index was built with.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct OpenAIEmbeddings {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIEmbeddings {
    pub fn new(api_key: String, config: &EmbeddingsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::ApiError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = serde_json::json!({
            "model": self.model,
            "input": texts
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbedError::RateLimitExceeded);
            }
            return Err(EmbedError::ApiError(format!("{}: {}", status, error_text)));
        }

        let response_data: serde_json::Value = response.json().await?;

        // Results carry an index; order by it rather than trusting array order.
        let mut indexed: Vec<(u64, Vec<f32>)> = response_data["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .enumerate()
                    .filter_map(|(pos, item)| {
                        let vector = item["embedding"]
                            .as_array()?
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect();
                        let index = item["index"].as_u64().unwrap_or(pos as u64);
                        Some((index, vector))
                    })
                    .collect()
            })
            .unwrap_or_default();
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.len() != texts.len() {
            return Err(EmbedError::ApiError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                indexed.len()
            )));
        }

        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}
