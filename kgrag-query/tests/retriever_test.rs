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

//! End-to-end behaviour of the hybrid retriever against scripted clients.

use async_trait::async_trait;
use kgrag_core::{
    LanguageModel, LlmError, RdfTerm, SparqlResults, StructuredRow, TripleStore,
    TripleStoreError, VectorPassage, VectorStore, VectorStoreError,
};
use kgrag_prompts::{
    PromptBindings, PromptLibrary, PromptTemplate, RdfSchemaContext, FINAL_ANSWER,
    SPARQL_GENERATION, SPARQL_RECOVERY,
};
use kgrag_query::{HybridRetriever, RetrievalError, RetrieverConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type Synthesis = Box<dyn Fn(&PromptBindings) -> Result<String, LlmError> + Send + Sync>;

/// Returns queued queries for generation and recovery prompts and delegates
/// the final answer to a closure.
struct ScriptedLlm {
    queries: Mutex<VecDeque<String>>,
    synthesis: Synthesis,
    calls: Mutex<Vec<(String, PromptBindings)>>,
}

impl ScriptedLlm {
    fn new(queries: &[&str], synthesis: Synthesis) -> Self {
        Self {
            queries: Mutex::new(queries.iter().map(|q| q.to_string()).collect()),
            synthesis,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_to(&self, name: &str) -> Vec<PromptBindings> {
        self.calls
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(
        &self,
        template: &PromptTemplate,
        bindings: &PromptBindings,
    ) -> Result<String, LlmError> {
        // Rendering proves the bindings satisfy the template.
        template.render(bindings)?;
        self.calls.lock().push((template.name.clone(), bindings.clone()));
        if template.name == FINAL_ANSWER {
            return (self.synthesis)(bindings);
        }
        self.queries
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Api("no scripted query left".to_string()))
    }
}

struct ScriptedStore {
    responses: Mutex<VecDeque<Result<SparqlResults, TripleStoreError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedStore {
    fn new(responses: Vec<Result<SparqlResults, TripleStoreError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl TripleStore for ScriptedStore {
    async fn execute(&self, query: &str) -> Result<SparqlResults, TripleStoreError> {
        self.executed.lock().push(query.to_string());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(TripleStoreError::Execution(
                "Virtuoso 37000 Error SP031: Variable 'risk' is used but not assigned".to_string(),
            ))
        })
    }
}

struct StaticPassages {
    result: Result<Vec<VectorPassage>, String>,
    requested: Mutex<Vec<usize>>,
}

impl StaticPassages {
    fn new(texts: &[&str]) -> Self {
        Self {
            result: Ok(texts.iter().map(|t| VectorPassage::new(*t)).collect()),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            result: Err("connection refused".to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for StaticPassages {
    async fn search(
        &self,
        _query: &str,
        top_k: usize,
    ) -> Result<Vec<VectorPassage>, VectorStoreError> {
        self.requested.lock().push(top_k);
        match &self.result {
            Ok(passages) => Ok(passages.iter().take(top_k).cloned().collect()),
            Err(msg) => Err(VectorStoreError::Transport(msg.clone())),
        }
    }
}

fn retriever(
    store: Arc<ScriptedStore>,
    passages: Arc<StaticPassages>,
    llm: Arc<ScriptedLlm>,
    config: RetrieverConfig,
) -> HybridRetriever {
    HybridRetriever::with_config(
        store,
        passages,
        llm,
        Arc::new(PromptLibrary::builtin().unwrap()),
        Arc::new(RdfSchemaContext::suppliers().unwrap()),
        config,
    )
}

fn rows(variables: &[&str], rows: Vec<StructuredRow>) -> SparqlResults {
    SparqlResults::new(variables.iter().map(|v| v.to_string()).collect(), rows)
}

fn acme_row() -> StructuredRow {
    StructuredRow::new()
        .with("supplierName", RdfTerm::literal("Acme Co"))
        .with("risk", RdfTerm::literal("High"))
        .with("country", RdfTerm::iri("http://sap.com/rag/Russia"))
        .with("email", RdfTerm::literal("ops@acme.example"))
}

/// Mimics the grounding rule: names only what the graph context contains.
fn grounded_synthesis() -> Synthesis {
    Box::new(|bindings: &PromptBindings| {
        let context = bindings.get("sparql_context").unwrap_or_default();
        if context.is_empty() {
            return Ok("Information not available.".to_string());
        }
        let names: Vec<String> = context
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|row| row["supplierName"].as_str().map(str::to_string))
            .collect();
        Ok(format!("High-risk suppliers: {}.", names.join(", ")))
    })
}

#[tokio::test]
async fn test_failing_query_is_retried_exactly_once() {
    let store = Arc::new(ScriptedStore::always_failing());
    let llm = Arc::new(ScriptedLlm::new(
        &["SELECT ?risk WHERE { ?c ?p ?o }", "SELECT ?risk WHERE { ?c ?q ?o }"],
        grounded_synthesis(),
    ));
    let retriever = retriever(
        store.clone(),
        Arc::new(StaticPassages::new(&[])),
        llm.clone(),
        RetrieverConfig::default(),
    );

    let outcome = retriever
        .execute_sparql_with_retry("SELECT ?risk WHERE { ?c ?p ?o }", "Which risks exist?")
        .await
        .unwrap();

    assert_eq!(outcome.rows, None);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(store.executed().len(), 2);
    assert_eq!(llm.calls_to(SPARQL_RECOVERY).len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_still_answer() {
    let store = Arc::new(ScriptedStore::always_failing());
    let llm = Arc::new(ScriptedLlm::new(&["BAD 1", "BAD 2"], grounded_synthesis()));
    let retriever = retriever(
        store.clone(),
        Arc::new(StaticPassages::new(&["GlobalParts Inc ships from Pyongyang."])),
        llm.clone(),
        RetrieverConfig::default(),
    );

    let answer = retriever.answer_detailed("Any risk in North Korea?").await.unwrap();
    assert_eq!(answer.answer, "Information not available.");
    assert_eq!(answer.attempts, 2);
    assert_eq!(answer.sparql_query, "BAD 2");
    assert!(answer.structured_rows.is_none());

    let finals = llm.calls_to(FINAL_ANSWER);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].get("sparql_context"), Some(""));
}

#[tokio::test]
async fn test_recovery_prompt_carries_error_and_second_rows_win() {
    let store = Arc::new(ScriptedStore::new(vec![
        Err(TripleStoreError::Execution(
            "Variable 'risk' is used but not assigned".to_string(),
        )),
        Ok(rows(&["supplierName", "risk"], vec![acme_row()])),
    ]));
    let llm = Arc::new(ScriptedLlm::new(
        &[
            "```sparql\nSELECT ?supplierName ?risk WHERE { ?s rag:locatedIn rag:Russia }\n```",
            "SELECT ?supplierName ?risk WHERE { ?s rag:locatedIn ?c . ?c rag:hasGeopoliticalRisk ?risk }",
        ],
        grounded_synthesis(),
    ));
    let retriever = retriever(
        store.clone(),
        Arc::new(StaticPassages::new(&[])),
        llm.clone(),
        RetrieverConfig::default(),
    );

    let answer = retriever.answer_detailed("Which suppliers in Russia are risky?").await.unwrap();

    let executed = store.executed();
    assert_eq!(executed.len(), 2);
    assert!(!executed[0].contains("```"));

    let recovery = llm.calls_to(SPARQL_RECOVERY);
    assert_eq!(recovery.len(), 1);
    assert_eq!(recovery[0].get("bad_query"), Some(executed[0].as_str()));
    assert!(recovery[0]
        .get("error_message")
        .unwrap()
        .contains("Variable 'risk' is used but not assigned"));
    assert_eq!(recovery[0].get("question"), Some("Which suppliers in Russia are risky?"));

    assert_eq!(answer.sparql_query, executed[1]);
    assert_eq!(answer.structured_rows, Some(vec![acme_row()]));
    assert_eq!(answer.answer, "High-risk suppliers: Acme Co.");
}

#[tokio::test]
async fn test_sensitive_values_never_reach_the_model() {
    let store = Arc::new(ScriptedStore::new(vec![Ok(rows(
        &["supplierName", "risk", "country", "email"],
        vec![acme_row()],
    ))]));
    let llm = Arc::new(ScriptedLlm::new(
        &["SELECT ?supplierName ?risk ?country ?email WHERE { }"],
        grounded_synthesis(),
    ));
    let retriever = retriever(
        store,
        Arc::new(StaticPassages::new(&["Acme Co expanded its plant."])),
        llm.clone(),
        RetrieverConfig::default(),
    );

    let answer = retriever.answer("Which suppliers are high risk?").await.unwrap();
    assert!(answer.contains("Acme Co"));
    assert!(!answer.contains("MASKED_SUPPLIERNAME_1"));

    let finals = llm.calls_to(FINAL_ANSWER);
    let context = finals[0].get("sparql_context").unwrap();
    assert_eq!(
        context,
        r#"{"supplierName": "MASKED_SUPPLIERNAME_1", "risk": "High", "country": "http://sap.com/rag/Russia", "email": "MASKED_EMAIL_2"}"#
    );
    assert!(!context.contains("Acme Co"));
    assert!(!context.contains("ops@acme.example"));
    // Passages are not masked.
    assert_eq!(finals[0].get("vector_context"), Some("Acme Co expanded its plant."));
}

#[tokio::test]
async fn test_documents_alone_do_not_ground_an_answer() {
    let store = Arc::new(ScriptedStore::new(vec![Ok(rows(&["supplierName", "risk"], vec![]))]));
    let llm = Arc::new(ScriptedLlm::new(
        &["SELECT ?supplierName ?risk WHERE { ?s rag:locatedIn rag:North_Korea }"],
        grounded_synthesis(),
    ));
    let passages = Arc::new(StaticPassages::new(&[
        "GlobalParts Inc reports delays at its North Korea plant.",
        "GlobalParts Inc is under sanctions review.",
    ]));
    let retriever = retriever(store, passages, llm.clone(), RetrieverConfig::default());

    let answer = retriever
        .answer_detailed("Are suppliers in North Korea facing issues?")
        .await
        .unwrap();

    assert_eq!(answer.structured_rows, Some(vec![]));
    assert!(answer.answer.contains("Information not available."));
    assert!(!answer.answer.contains("GlobalParts Inc"));

    let finals = llm.calls_to(FINAL_ANSWER);
    assert!(finals[0].get("vector_context").unwrap().contains("GlobalParts Inc"));
    assert_eq!(finals[0].get("sparql_context"), Some(""));

    let prompt = PromptLibrary::builtin().unwrap().get(FINAL_ANSWER).unwrap();
    assert!(prompt
        .template
        .contains("Only suppliers that appear in the knowledge graph results"));
}

#[tokio::test]
async fn test_vector_failure_propagates() {
    let store = Arc::new(ScriptedStore::always_failing());
    let llm = Arc::new(ScriptedLlm::new(&["SELECT * WHERE { }"], grounded_synthesis()));
    let retriever = retriever(
        store.clone(),
        Arc::new(StaticPassages::failing()),
        llm,
        RetrieverConfig::default(),
    );

    let err = retriever.answer("Anything?").await.unwrap_err();
    assert!(matches!(err, RetrievalError::VectorSearch(_)));
    assert!(store.executed().is_empty());
}

#[tokio::test]
async fn test_synthesis_failure_propagates() {
    let store = Arc::new(ScriptedStore::new(vec![Ok(rows(&["risk"], vec![]))]));
    let llm = Arc::new(ScriptedLlm::new(
        &["SELECT ?risk WHERE { }"],
        Box::new(|_: &PromptBindings| Err(LlmError::RateLimit)),
    ));
    let retriever = retriever(
        store,
        Arc::new(StaticPassages::new(&[])),
        llm,
        RetrieverConfig::default(),
    );

    let err = retriever.answer("What is the risk?").await.unwrap_err();
    assert!(matches!(err, RetrievalError::LanguageModel(LlmError::RateLimit)));
}

#[tokio::test]
async fn test_recovery_failure_is_fatal() {
    let store = Arc::new(ScriptedStore::always_failing());
    // Only the first query is scripted, so the recovery call errors.
    let llm = Arc::new(ScriptedLlm::new(&["SELECT ?x WHERE { }"], grounded_synthesis()));
    let retriever = retriever(
        store,
        Arc::new(StaticPassages::new(&[])),
        llm,
        RetrieverConfig::default(),
    );

    let err = retriever.answer("What is the risk?").await.unwrap_err();
    assert!(matches!(err, RetrievalError::LanguageModel(LlmError::Api(_))));
}

#[tokio::test]
async fn test_parallel_mode_and_top_k() {
    let store = Arc::new(ScriptedStore::new(vec![Ok(rows(
        &["supplierName", "risk"],
        vec![acme_row()],
    ))]));
    let llm = Arc::new(ScriptedLlm::new(&["SELECT ?supplierName ?risk WHERE { }"], grounded_synthesis()));
    let passages = Arc::new(StaticPassages::new(&["a", "b", "c"]));
    let config = RetrieverConfig {
        top_k: 2,
        parallel_retrieval: true,
        ..RetrieverConfig::default()
    };
    let retriever = retriever(store, passages.clone(), llm.clone(), config);

    let answer = retriever.answer_detailed("Which suppliers are risky?").await.unwrap();
    assert_eq!(answer.passages.len(), 2);
    assert_eq!(*passages.requested.lock(), vec![2]);
    assert_eq!(llm.calls_to(SPARQL_GENERATION).len(), 1);
    assert_eq!(answer.answer, "High-risk suppliers: Acme Co.");
}

#[tokio::test]
async fn test_default_top_k_is_25() {
    let store = Arc::new(ScriptedStore::new(vec![Ok(rows(&["risk"], vec![]))]));
    let llm = Arc::new(ScriptedLlm::new(&["SELECT ?risk WHERE { }"], grounded_synthesis()));
    let passages = Arc::new(StaticPassages::new(&["only one"]));
    let retriever = retriever(store, passages.clone(), llm, RetrieverConfig::default());

    retriever.answer("Risk?").await.unwrap();
    assert_eq!(*passages.requested.lock(), vec![25]);
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let retriever = retriever(
        Arc::new(ScriptedStore::always_failing()),
        Arc::new(StaticPassages::new(&[])),
        Arc::new(ScriptedLlm::new(&[], grounded_synthesis())),
        RetrieverConfig::default(),
    );
    assert!(matches!(
        retriever.answer("   ").await,
        Err(RetrievalError::EmptyQuestion)
    ));
}
