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

use kgrag_prompts::PromptError;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a triple store. Every variant is recoverable by
/// regenerating the query.
#[derive(Debug, Error)]
pub enum TripleStoreError {
    #[error("SPARQL execution failed: {0}")]
    Execution(String),

    #[error("Triple store unreachable: {0}")]
    Transport(String),

    #[error("Invalid SPARQL results: {0}")]
    InvalidResponse(String),

    #[error("Triple store timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector search failed: {0}")]
    Search(String),

    #[error("Vector store unreachable: {0}")]
    Transport(String),

    #[error("Vector index unavailable: {0}")]
    Index(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
}
