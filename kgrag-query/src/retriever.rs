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

//! The hybrid retrieval pipeline.

use crate::cleaning::clean_query;
use crate::error::RetrievalError;
use kgrag_core::{
    render_passages, render_rows, LanguageModel, Pseudonymizer, StructuredRow, TripleStore,
    VectorPassage, VectorStore,
};
use kgrag_prompts::{
    PromptBindings, PromptLibrary, RdfSchemaContext, FINAL_ANSWER, SPARQL_GENERATION,
    SPARQL_RECOVERY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tuning for [`HybridRetriever`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Passages requested from the vector store.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Regenerations allowed after the first query fails.
    #[serde(default = "default_max_sparql_retries")]
    pub max_sparql_retries: u32,

    /// Run vector search and query generation concurrently.
    #[serde(default)]
    pub parallel_retrieval: bool,
}

fn default_top_k() -> usize {
    25
}

fn default_max_sparql_retries() -> u32 {
    1
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_sparql_retries: default_max_sparql_retries(),
            parallel_retrieval: false,
        }
    }
}

/// Result of running a generated query with bounded recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct SparqlOutcome {
    /// `None` when every attempt failed.
    pub rows: Option<Vec<StructuredRow>>,
    /// Projected variables reported by the store for the successful query.
    pub variables: Vec<String>,
    /// The last query executed.
    pub final_query: String,
    pub attempts: u32,
}

/// Answer plus the intermediate state that produced it.
#[derive(Debug, Clone)]
pub struct HybridAnswer {
    pub answer: String,
    pub sparql_query: String,
    pub attempts: u32,
    /// Unmasked rows; never sent to the language model.
    pub structured_rows: Option<Vec<StructuredRow>>,
    pub passages: Vec<VectorPassage>,
}

/// Orchestrates one question through vector search, SPARQL and synthesis.
///
/// The retriever itself is stateless between calls and can be shared
/// across concurrent requests; each call owns its own [`Pseudonymizer`].
pub struct HybridRetriever {
    triple_store: Arc<dyn TripleStore>,
    vector_store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    prompts: Arc<PromptLibrary>,
    schema: Arc<RdfSchemaContext>,
    rdf_context: String,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        triple_store: Arc<dyn TripleStore>,
        vector_store: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
        prompts: Arc<PromptLibrary>,
        schema: Arc<RdfSchemaContext>,
    ) -> Self {
        Self::with_config(
            triple_store,
            vector_store,
            llm,
            prompts,
            schema,
            RetrieverConfig::default(),
        )
    }

    pub fn with_config(
        triple_store: Arc<dyn TripleStore>,
        vector_store: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
        prompts: Arc<PromptLibrary>,
        schema: Arc<RdfSchemaContext>,
        config: RetrieverConfig,
    ) -> Self {
        let rdf_context = schema.render();
        Self {
            triple_store,
            vector_store,
            llm,
            prompts,
            schema,
            rdf_context,
            config,
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub async fn answer(&self, question: &str) -> Result<String, RetrievalError> {
        Ok(self.answer_detailed(question).await?.answer)
    }

    pub async fn answer_detailed(&self, question: &str) -> Result<HybridAnswer, RetrievalError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }
        let started = Instant::now();

        let (passages, query) = if self.config.parallel_retrieval {
            tokio::try_join!(
                self.retrieve_passages(question),
                self.generate_sparql(question)
            )?
        } else {
            let passages = self.retrieve_passages(question).await?;
            let query = self.generate_sparql(question).await?;
            (passages, query)
        };

        let outcome = self.execute_sparql_with_retry(&query, question).await?;
        if outcome.rows.is_some() {
            let unknown = self.schema.check_variables(&outcome.variables);
            if !unknown.is_empty() {
                warn!(columns = ?unknown, "Query returned columns outside the variable whitelist");
            }
        }

        // Masking state lives only as long as this call.
        let mut pseudonymizer = Pseudonymizer::for_schema(&self.schema);
        let sparql_context = match &outcome.rows {
            Some(rows) => render_rows(&pseudonymizer.pseudonymize_rows(rows)),
            None => String::new(),
        };

        let template = self.prompts.get(FINAL_ANSWER)?;
        let bindings = PromptBindings::new()
            .with("vector_context", render_passages(&passages))
            .with("sparql_context", sparql_context)
            .with("question", question);
        let synthesized = self.llm.complete(&template, &bindings).await?;
        let answer = pseudonymizer.restore(&synthesized).into_owned();

        info!(
            passages = passages.len(),
            rows = outcome.rows.as_ref().map(Vec::len),
            attempts = outcome.attempts,
            placeholders = pseudonymizer.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(HybridAnswer {
            answer,
            sparql_query: outcome.final_query,
            attempts: outcome.attempts,
            structured_rows: outcome.rows,
            passages,
        })
    }

    async fn retrieve_passages(&self, question: &str) -> Result<Vec<VectorPassage>, RetrievalError> {
        let passages = self.vector_store.search(question, self.config.top_k).await?;
        debug!(count = passages.len(), top_k = self.config.top_k, "Retrieved passages");
        Ok(passages)
    }

    async fn generate_sparql(&self, question: &str) -> Result<String, RetrievalError> {
        let template = self.prompts.get(SPARQL_GENERATION)?;
        let bindings = PromptBindings::new()
            .with("rdf_context", self.rdf_context.as_str())
            .with("question", question);
        let query = clean_query(&self.llm.complete(&template, &bindings).await?);
        debug!(query = %query, "Generated SPARQL query");
        Ok(query)
    }

    async fn regenerate_sparql(
        &self,
        bad_query: &str,
        error_message: &str,
        question: &str,
    ) -> Result<String, RetrievalError> {
        let template = self.prompts.get(SPARQL_RECOVERY)?;
        let bindings = PromptBindings::new()
            .with("rdf_context", self.rdf_context.as_str())
            .with("question", question)
            .with("bad_query", bad_query)
            .with("error_message", error_message);
        let query = clean_query(&self.llm.complete(&template, &bindings).await?);
        debug!(query = %query, "Regenerated SPARQL query");
        Ok(query)
    }

    /// Execute `query`, regenerating it from the store's error message
    /// while the retry budget lasts.
    ///
    /// Store failures never surface as errors: once the budget is spent the
    /// outcome carries `rows: None`. Only a failing recovery prompt is fatal.
    pub async fn execute_sparql_with_retry(
        &self,
        query: &str,
        question: &str,
    ) -> Result<SparqlOutcome, RetrievalError> {
        let mut query = clean_query(query);
        let mut budget = self.config.max_sparql_retries;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let err = match self.triple_store.execute(&query).await {
                Ok(results) => {
                    debug!(rows = results.rows.len(), attempts, "SPARQL query succeeded");
                    return Ok(SparqlOutcome {
                        rows: Some(results.rows),
                        variables: results.metadata.variables,
                        final_query: query,
                        attempts,
                    });
                }
                Err(err) => err,
            };

            warn!(attempt = attempts, error = %err, "SPARQL execution failed");
            if budget == 0 {
                warn!(
                    attempts,
                    "SPARQL retries exhausted, continuing without structured results"
                );
                return Ok(SparqlOutcome {
                    rows: None,
                    variables: Vec::new(),
                    final_query: query,
                    attempts,
                });
            }
            budget -= 1;

            info!(remaining = budget, "Regenerating SPARQL query from execution error");
            query = self
                .regenerate_sparql(&query, &err.to_string(), question)
                .await?;
        }
    }
}
