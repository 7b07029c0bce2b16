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

//! Document retrieval backends.

use super::embeddings::{EmbedError, EmbeddingClient};
use crate::config::VectorStoreConfig;
use async_trait::async_trait;
use kgrag_core::{PassageMetadata, VectorPassage, VectorStore, VectorStoreError};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

impl From<EmbedError> for VectorStoreError {
    fn from(err: EmbedError) -> Self {
        VectorStoreError::Embedding(err.to_string())
    }
}

/// Qdrant collection searched over its REST API.
pub struct QdrantVectorStore {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
    embedder: Arc<dyn EmbeddingClient>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ScoredPoint {
    /// Accepts both `content` and the LangChain-style `page_content` key.
    fn into_passage(self) -> Option<VectorPassage> {
        let mut payload = self.payload?;
        let content = payload
            .remove("content")
            .or_else(|| payload.remove("page_content"))?;
        let content = content.as_str()?.to_string();
        let metadata = payload
            .remove("metadata")
            .and_then(|m| serde_json::from_value::<PassageMetadata>(m).ok())
            .unwrap_or_default();
        Some(VectorPassage {
            content,
            metadata,
            score: Some(self.score),
        })
    }
}

impl QdrantVectorStore {
    pub fn new(config: &VectorStoreConfig, embedder: Arc<dyn EmbeddingClient>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            client,
            embedder,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<VectorPassage>, VectorStoreError> {
        let vector = self.embedder.embed(query).await?;

        let mut request = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.base_url, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VectorStoreError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Search(format!("HTTP {}: {}", status, body)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;
        let passages: Vec<VectorPassage> = parsed
            .result
            .into_iter()
            .filter_map(ScoredPoint::into_passage)
            .take(top_k)
            .collect();
        debug!(collection = %self.collection, count = passages.len(), "Qdrant search");
        Ok(passages)
    }
}

/// A pre-embedded chunk as written by the document ingestion job.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedChunk {
    pub content: String,
    #[serde(default)]
    pub metadata: PassageMetadata,
    pub vector: Vec<f32>,
}

/// Brute-force cosine search over chunks held in memory.
pub struct InMemoryVectorStore {
    chunks: Vec<EmbeddedChunk>,
    dimension: usize,
    embedder: Arc<dyn EmbeddingClient>,
}

impl InMemoryVectorStore {
    pub fn new(
        chunks: Vec<EmbeddedChunk>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, VectorStoreError> {
        let dimension = chunks.first().map(|c| c.vector.len()).unwrap_or(0);
        if let Some(bad) = chunks.iter().position(|c| c.vector.len() != dimension) {
            return Err(VectorStoreError::Index(format!(
                "chunk {} has dimension {}, expected {}",
                bad,
                chunks[bad].vector.len(),
                dimension
            )));
        }
        Ok(Self {
            chunks,
            dimension,
            embedder,
        })
    }

    /// Load a JSON array of `{content, metadata, vector}` objects.
    pub fn load(path: &Path, embedder: Arc<dyn EmbeddingClient>) -> Result<Self, VectorStoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VectorStoreError::Index(format!("{}: {}", path.display(), e)))?;
        let chunks: Vec<EmbeddedChunk> = serde_json::from_str(&text)
            .map_err(|e| VectorStoreError::Index(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), chunks = chunks.len(), "Loaded in-memory vector index");
        Self::new(chunks, embedder)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<VectorPassage>, VectorStoreError> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        if vector.len() != self.dimension {
            return Err(VectorStoreError::Index(format!(
                "query embedding has dimension {}, index has {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(&vector, &chunk.vector)))
            .collect();
        // Stable sort keeps load order for equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                VectorPassage {
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                    score: Some(score),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns the same vector for every text.
    struct FixedEmbeddings(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(self.0.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    fn chunk(content: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            content: content.to_string(),
            metadata: PassageMetadata::default(),
            vector,
        }
    }

    #[tokio::test]
    async fn test_in_memory_ranks_by_cosine() {
        let store = InMemoryVectorStore::new(
            vec![
                chunk("orthogonal", vec![0.0, 1.0]),
                chunk("aligned", vec![2.0, 0.0]),
                chunk("diagonal", vec![1.0, 1.0]),
                chunk("aligned twin", vec![5.0, 0.0]),
            ],
            Arc::new(FixedEmbeddings(vec![1.0, 0.0])),
        )
        .unwrap();

        let passages = store.search("q", 3).await.unwrap();
        let contents: Vec<&str> = passages.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["aligned", "aligned twin", "diagonal"]);
        assert!((passages[0].score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_in_memory_dimension_checks() {
        assert!(InMemoryVectorStore::new(
            vec![chunk("a", vec![1.0]), chunk("b", vec![1.0, 2.0])],
            Arc::new(FixedEmbeddings(vec![1.0])),
        )
        .is_err());

        let store = InMemoryVectorStore::new(
            vec![chunk("a", vec![1.0, 0.0])],
            Arc::new(FixedEmbeddings(vec![1.0, 0.0, 0.0])),
        )
        .unwrap();
        assert!(matches!(
            store.search("q", 5).await,
            Err(VectorStoreError::Index(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(
            &path,
            r#"[{"content": "Supplier audit 2024", "metadata": {"source": "audit.pdf", "page": 4}, "vector": [0.1, 0.9]}]"#,
        )
        .unwrap();

        let store = InMemoryVectorStore::load(&path, Arc::new(FixedEmbeddings(vec![0.1, 0.9]))).unwrap();
        assert_eq!(store.len(), 1);
        let passages = store.search("audit", 25).await.unwrap();
        assert_eq!(passages[0].metadata.source.as_deref(), Some("audit.pdf"));
        assert_eq!(passages[0].metadata.page, Some(4));
    }

    #[tokio::test]
    async fn test_qdrant_search() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collections/rag_documents/points/search")
            .match_header("api-key", "qk")
            .match_body(mockito::Matcher::PartialJson(json!({
                "vector": [0.5, 0.5],
                "limit": 2,
                "with_payload": true
            })))
            .with_status(200)
            .with_body(
                r#"{"result": [
                    {"id": 1, "score": 0.92, "payload": {"page_content": "Acme Co expanded.", "metadata": {"source": "news.pdf", "page": 1}}},
                    {"id": 2, "score": 0.81, "payload": {"content": "Globex audit.", "metadata": {"start_index": 200}}},
                    {"id": 3, "score": 0.80, "payload": {"other": true}}
                ], "status": "ok", "time": 0.001}"#,
            )
            .create_async()
            .await;

        let config = VectorStoreConfig {
            url: server.url(),
            api_key: Some("qk".to_string()),
            ..VectorStoreConfig::default()
        };
        let store = QdrantVectorStore::new(&config, Arc::new(FixedEmbeddings(vec![0.5, 0.5]))).unwrap();
        let passages = store.search("Acme", 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].content, "Acme Co expanded.");
        assert_eq!(passages[0].metadata.source.as_deref(), Some("news.pdf"));
        assert_eq!(passages[1].metadata.start_index, Some(200));
    }

    #[tokio::test]
    async fn test_qdrant_missing_collection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/collections/rag_documents/points/search")
            .with_status(404)
            .with_body(r#"{"status": {"error": "Not found: Collection `rag_documents` doesn't exist!"}}"#)
            .create_async()
            .await;

        let config = VectorStoreConfig {
            url: server.url(),
            ..VectorStoreConfig::default()
        };
        let store = QdrantVectorStore::new(&config, Arc::new(FixedEmbeddings(vec![1.0]))).unwrap();
        match store.search("x", 5).await.unwrap_err() {
            VectorStoreError::Search(msg) => assert!(msg.contains("doesn't exist")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
