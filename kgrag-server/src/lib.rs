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

//! Kgrag Server
//!
//! HTTP front end and concrete clients for the hybrid retrieval pipeline.

pub mod api;
pub mod auth;
pub mod clients;
pub mod config;
pub mod llm;

use anyhow::{Context, Result};
use api::AppState;
use auth::{auth_middleware, Authenticator, BearerTokenAuth, NoAuth};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Extension, Router,
};
use clients::{HttpTripleStore, InMemoryVectorStore, OpenAIEmbeddings, QdrantVectorStore};
use config::{AuthConfig, KgragConfig, VectorBackend};
use kgrag_core::VectorStore;
use kgrag_prompts::{PromptLibrary, RdfSchemaContext};
use kgrag_query::HybridRetriever;
use llm::LLMClient;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "kgrag_server=info,kgrag_query=info,tower_http=info";

/// Install the global subscriber. Logs go to stderr; `KGRAG_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let json = std::env::var("KGRAG_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn build_vector_store(config: &KgragConfig) -> Result<Arc<dyn VectorStore>> {
    let api_key = config
        .embeddings_api_key()
        .context("no embeddings API key configured")?
        .to_string();
    let embedder = Arc::new(OpenAIEmbeddings::new(api_key, &config.embeddings)?);

    let store: Arc<dyn VectorStore> = match config.vector_store.backend {
        VectorBackend::Qdrant => {
            tracing::info!(
                url = %config.vector_store.url,
                collection = %config.vector_store.collection,
                "Using Qdrant vector store"
            );
            Arc::new(QdrantVectorStore::new(&config.vector_store, embedder)?)
        }
        VectorBackend::Memory => {
            let path = config
                .vector_store
                .path
                .as_deref()
                .context("vector_store.path is required for the memory backend")?;
            Arc::new(InMemoryVectorStore::load(path, embedder)?)
        }
    };
    Ok(store)
}

/// Wire the concrete clients into a retriever.
pub fn build_retriever(config: &KgragConfig) -> Result<HybridRetriever> {
    let prompts = PromptLibrary::builtin()?;
    if let Some(dir) = &config.retrieval.prompt_dir {
        let overridden = prompts
            .load_overrides(dir)
            .with_context(|| format!("loading prompt overrides from {}", dir.display()))?;
        tracing::info!(prompts = ?overridden, "Applied prompt overrides");
    }
    let schema = RdfSchemaContext::suppliers()?;

    let provider = llm::build_provider(&config.llm)?;
    let llm = Arc::new(LLMClient::new(provider, &config.llm));
    let triple_store = Arc::new(HttpTripleStore::new(&config.triple_store)?);
    let vector_store = build_vector_store(config)?;

    Ok(HybridRetriever::with_config(
        triple_store,
        vector_store,
        llm,
        Arc::new(prompts),
        Arc::new(schema),
        config.retrieval.retriever.clone(),
    ))
}

pub fn build_authenticator(config: &AuthConfig) -> Result<Arc<dyn Authenticator>> {
    if !config.enabled {
        tracing::warn!("Authentication disabled - /ask is open to any caller");
        return Ok(Arc::new(NoAuth));
    }
    let secret = config
        .jwt_secret
        .clone()
        .context("authentication enabled but no JWT secret configured")?;
    tracing::info!(scope = %config.required_scope, "Bearer token authentication enabled");
    Ok(Arc::new(BearerTokenAuth::new(secret, config.required_scope.clone())))
}

/// `/health` is public; `/ask` sits behind the authenticator.
pub fn build_router(state: AppState, authenticator: Arc<dyn Authenticator>, enable_cors: bool) -> Router {
    let authed_routes = Router::new()
        .route("/ask", post(api::ask))
        .layer(axum_middleware::from_fn(auth_middleware))
        .layer(Extension(authenticator));

    let app = Router::new()
        .route("/health", get(api::health_check))
        .merge(authed_routes)
        .with_state(state);

    let app = if enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server(config: KgragConfig) -> Result<()> {
    tracing::info!("Starting Kgrag Server");
    config.validate()?;

    let retriever = Arc::new(build_retriever(&config)?);
    let authenticator = build_authenticator(&config.auth)?;
    let state = AppState::new(retriever, config.request_timeout());
    let app = build_router(state, authenticator, config.server.enable_cors);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticator_selection() {
        assert!(build_authenticator(&AuthConfig::default()).is_ok());

        let config = AuthConfig {
            enabled: true,
            ..AuthConfig::default()
        };
        assert!(build_authenticator(&config).is_err());
    }

    #[test]
    fn test_build_retriever_with_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(&path, r#"[{"content": "x", "vector": [1.0]}]"#).unwrap();

        let mut config = KgragConfig::default();
        config.llm.openai_api_key = Some("sk-test".to_string());
        config.vector_store.backend = VectorBackend::Memory;
        config.vector_store.path = Some(path);
        assert!(config.validate().is_ok());
        assert!(build_retriever(&config).is_ok());
    }
}
