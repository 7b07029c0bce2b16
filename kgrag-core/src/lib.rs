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

//! Kgrag Core
//!
//! Domain types shared by the hybrid retrieval pipeline: vector passages,
//! SPARQL result rows, the supplier field catalogue, the client-boundary
//! traits and the request-scoped pseudonymization codec.

pub mod client;
pub mod error;
pub mod field;
pub mod passage;
pub mod privacy;
pub mod sparql;

pub use client::{LanguageModel, TripleStore, VectorStore};
pub use error::{LlmError, TripleStoreError, VectorStoreError};
pub use field::SupplierField;
pub use passage::{render_passages, PassageMetadata, VectorPassage};
pub use privacy::{MaskingRules, Pseudonymizer, PLACEHOLDER_PREFIX};
pub use sparql::{render_rows, RdfTerm, ResultMetadata, SparqlResults, StructuredRow, TermKind};
