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

use kgrag_core::{LlmError, VectorStoreError};
use kgrag_prompts::PromptError;
use thiserror::Error;

/// Unrecoverable failure of a single `answer` call.
///
/// Triple store failures never appear here: an exhausted query retry
/// degrades to an answer without structured results.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Vector search failed: {0}")]
    VectorSearch(#[from] VectorStoreError),

    #[error("Language model call failed: {0}")]
    LanguageModel(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
}
