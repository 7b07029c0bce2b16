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

//! Kgrag Query
//!
//! Hybrid retrieval over a supplier knowledge graph and a document index:
//! vector search, LLM-generated SPARQL with one error-driven regeneration,
//! pseudonymized synthesis and placeholder restoration.

pub mod cleaning;
pub mod error;
pub mod retriever;

pub use cleaning::clean_query;
pub use error::RetrievalError;
pub use retriever::{HybridAnswer, HybridRetriever, RetrieverConfig, SparqlOutcome};
