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

//! Boundaries to the external services the pipeline talks to.
//!
//! Implementations live in the server crate; tests substitute in-memory
//! doubles.

use crate::error::{LlmError, TripleStoreError, VectorStoreError};
use crate::passage::VectorPassage;
use crate::sparql::SparqlResults;
use async_trait::async_trait;
use kgrag_prompts::{PromptBindings, PromptTemplate};

/// Executes SPARQL SELECT queries against an RDF store.
#[async_trait]
pub trait TripleStore: Send + Sync {
    async fn execute(&self, query: &str) -> Result<SparqlResults, TripleStoreError>;
}

/// Similarity search over embedded document chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// At most `top_k` passages, most relevant first.
    async fn search(&self, query: &str, top_k: usize)
        -> Result<Vec<VectorPassage>, VectorStoreError>;
}

/// Deterministic completion over a rendered prompt template.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        template: &PromptTemplate,
        bindings: &PromptBindings,
    ) -> Result<String, LlmError>;

    fn name(&self) -> &str {
        "language-model"
    }
}
