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

use anyhow::{bail, Context, Result};
use kgrag_query::RetrieverConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kgrag Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KgragConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LLMConfig,
    #[serde(default)]
    pub triple_store: TripleStoreConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:8080")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Request timeout in seconds; covers every model and store call of one answer
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            request_timeout_secs: default_request_timeout(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require a bearer token on /ask (default: false for development)
    #[serde(default)]
    pub enabled: bool,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: Option<String>,

    /// Scope that must appear in the token's `scope` claim
    #[serde(default = "default_required_scope")]
    pub required_scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: None,
            required_scope: default_required_scope(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAI,
    Anthropic,
    Ollama,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => bail!("Unknown LLM provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LLMConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Completion budget; required by Anthropic
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible API base (e.g., a proxy deployment)
    pub openai_api_base: Option<String>,

    /// Anthropic API key
    pub anthropic_api_key: Option<String>,

    /// Ollama base URL (e.g., "http://localhost:11434")
    pub ollama_base_url: Option<String>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            openai_api_key: None,
            openai_api_base: None,
            anthropic_api_key: None,
            ollama_base_url: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TripleStoreConfig {
    /// SPARQL 1.1 Protocol query endpoint
    #[serde(default = "default_sparql_endpoint")]
    pub endpoint: String,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for TripleStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_sparql_endpoint(),
            username: None,
            password: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorBackend,

    /// Qdrant REST base URL
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    pub api_key: Option<String>,

    /// Pre-embedded chunks for the in-memory backend
    pub path: Option<PathBuf>,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            path: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingsConfig {
    /// Falls back to `llm.openai_api_key` when unset
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base")]
    pub api_base: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_openai_base(),
            model: default_embedding_model(),
            timeout_secs: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetrievalSettings {
    #[serde(flatten)]
    pub retriever: RetrieverConfig,

    /// Directory of `<name>.txt` prompt overrides
    pub prompt_dir: Option<PathBuf>,
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_required_scope() -> String {
    "uaa.resource".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_sparql_endpoint() -> String {
    "http://localhost:8890/sparql".to_string()
}

fn default_store_timeout() -> u64 {
    30
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "rag_documents".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

impl KgragConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment variables that are set.
    ///
    /// Supported environment variables:
    /// - KGRAG_HTTP_ADDR, KGRAG_REQUEST_TIMEOUT, KGRAG_ENABLE_CORS
    /// - KGRAG_AUTH_ENABLED, KGRAG_JWT_SECRET, KGRAG_REQUIRED_SCOPE
    /// - KGRAG_LLM_PROVIDER, KGRAG_LLM_MODEL, KGRAG_LLM_TIMEOUT
    /// - OPENAI_API_KEY, OPENAI_API_BASE, ANTHROPIC_API_KEY, OLLAMA_BASE_URL
    /// - KGRAG_SPARQL_ENDPOINT, KGRAG_SPARQL_USER, KGRAG_SPARQL_PASSWORD
    /// - KGRAG_VECTOR_BACKEND, KGRAG_QDRANT_URL, KGRAG_QDRANT_COLLECTION,
    ///   KGRAG_QDRANT_API_KEY, KGRAG_VECTOR_PATH
    /// - KGRAG_EMBEDDING_MODEL
    /// - KGRAG_TOP_K, KGRAG_MAX_SPARQL_RETRIES, KGRAG_PARALLEL_RETRIEVAL,
    ///   KGRAG_PROMPT_DIR
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }

        macro_rules! set {
            ($key:literal => Some $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = Some(value);
                }
            };
            ($key:literal => parse $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = parsed($key, value)?;
                }
            };
            ($key:literal => $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = value;
                }
            };
        }

        // Server configuration
        set!("KGRAG_HTTP_ADDR" => self.server.listen_addr);
        set!("KGRAG_REQUEST_TIMEOUT" => parse self.server.request_timeout_secs);
        set!("KGRAG_ENABLE_CORS" => parse self.server.enable_cors);

        // Auth configuration
        set!("KGRAG_AUTH_ENABLED" => parse self.auth.enabled);
        set!("KGRAG_JWT_SECRET" => Some self.auth.jwt_secret);
        set!("KGRAG_REQUIRED_SCOPE" => self.auth.required_scope);

        // LLM configuration
        set!("KGRAG_LLM_PROVIDER" => parse self.llm.provider);
        set!("KGRAG_LLM_MODEL" => self.llm.model);
        set!("KGRAG_LLM_TIMEOUT" => parse self.llm.timeout_secs);
        set!("OPENAI_API_KEY" => Some self.llm.openai_api_key);
        set!("OPENAI_API_BASE" => Some self.llm.openai_api_base);
        set!("ANTHROPIC_API_KEY" => Some self.llm.anthropic_api_key);
        set!("OLLAMA_BASE_URL" => Some self.llm.ollama_base_url);

        // Stores
        set!("KGRAG_SPARQL_ENDPOINT" => self.triple_store.endpoint);
        set!("KGRAG_SPARQL_USER" => Some self.triple_store.username);
        set!("KGRAG_SPARQL_PASSWORD" => Some self.triple_store.password);
        if let Some(backend) = lookup("KGRAG_VECTOR_BACKEND") {
            self.vector_store.backend = match backend.to_ascii_lowercase().as_str() {
                "qdrant" => VectorBackend::Qdrant,
                "memory" => VectorBackend::Memory,
                other => bail!("Invalid value for KGRAG_VECTOR_BACKEND: {}", other),
            };
        }
        set!("KGRAG_QDRANT_URL" => self.vector_store.url);
        set!("KGRAG_QDRANT_COLLECTION" => self.vector_store.collection);
        set!("KGRAG_QDRANT_API_KEY" => Some self.vector_store.api_key);
        if let Some(path) = lookup("KGRAG_VECTOR_PATH") {
            self.vector_store.path = Some(PathBuf::from(path));
        }
        set!("KGRAG_EMBEDDING_MODEL" => self.embeddings.model);

        // Retrieval
        set!("KGRAG_TOP_K" => parse self.retrieval.retriever.top_k);
        set!("KGRAG_MAX_SPARQL_RETRIES" => parse self.retrieval.retriever.max_sparql_retries);
        set!("KGRAG_PARALLEL_RETRIEVAL" => parse self.retrieval.retriever.parallel_retrieval);
        if let Some(dir) = lookup("KGRAG_PROMPT_DIR") {
            self.retrieval.prompt_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {}", self.server.listen_addr))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// API key for the embeddings endpoint, falling back to the OpenAI chat key.
    pub fn embeddings_api_key(&self) -> Option<&str> {
        self.embeddings
            .api_key
            .as_deref()
            .or(self.llm.openai_api_key.as_deref())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.auth.enabled && self.auth.jwt_secret.is_none() {
            bail!("Authentication enabled but no JWT secret configured");
        }

        match self.llm.provider {
            ProviderKind::OpenAI if self.llm.openai_api_key.is_none() => {
                bail!("LLM provider 'openai' requires OPENAI_API_KEY")
            }
            ProviderKind::Anthropic if self.llm.anthropic_api_key.is_none() => {
                bail!("LLM provider 'anthropic' requires ANTHROPIC_API_KEY")
            }
            _ => {}
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("LLM temperature must be within 0.0..=2.0");
        }

        url::Url::parse(&self.triple_store.endpoint)
            .with_context(|| format!("invalid SPARQL endpoint {}", self.triple_store.endpoint))?;

        match self.vector_store.backend {
            VectorBackend::Qdrant => {
                url::Url::parse(&self.vector_store.url)
                    .with_context(|| format!("invalid Qdrant URL {}", self.vector_store.url))?;
            }
            VectorBackend::Memory => {
                if self.vector_store.path.is_none() {
                    bail!("Memory vector backend requires vector_store.path");
                }
            }
        }
        if self.embeddings_api_key().is_none() {
            bail!("Questions are embedded before search; set embeddings.api_key or OPENAI_API_KEY");
        }

        if self.retrieval.retriever.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        for (name, secs) in [
            ("server.request_timeout_secs", self.server.request_timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("triple_store.timeout_secs", self.triple_store.timeout_secs),
            ("vector_store.timeout_secs", self.vector_store.timeout_secs),
        ] {
            if secs == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }
}
