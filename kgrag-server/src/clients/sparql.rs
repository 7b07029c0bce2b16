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

//! SPARQL 1.1 Protocol client (query via form-encoded POST, JSON results).

use crate::config::TripleStoreConfig;
use async_trait::async_trait;
use kgrag_core::{RdfTerm, SparqlResults, StructuredRow, TripleStore, TripleStoreError};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const RESULTS_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Deserialize)]
struct ResultsDocument {
    head: Head,
    results: Option<Bindings>,
}

#[derive(Debug, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Bindings {
    bindings: Vec<HashMap<String, RdfTerm>>,
}

/// Parse a SPARQL 1.1 JSON results document.
///
/// Row columns follow `head.vars`; variables left unbound by a solution are
/// absent from that row.
pub fn parse_results(body: &str) -> Result<SparqlResults, TripleStoreError> {
    let doc: ResultsDocument = serde_json::from_str(body)
        .map_err(|e| TripleStoreError::InvalidResponse(e.to_string()))?;
    let Some(results) = doc.results else {
        return Err(TripleStoreError::InvalidResponse(
            "not a SELECT result (missing results.bindings)".to_string(),
        ));
    };

    let rows = results
        .bindings
        .into_iter()
        .map(|mut solution| {
            let mut row = StructuredRow::new();
            for var in &doc.head.vars {
                if let Some(term) = solution.remove(var) {
                    row.push(var.clone(), term);
                }
            }
            // Bindings the head did not announce keep their place at the end.
            let mut extra: Vec<_> = solution.into_iter().collect();
            extra.sort_by(|a, b| a.0.cmp(&b.0));
            for (var, term) in extra {
                row.push(var, term);
            }
            row
        })
        .collect();

    Ok(SparqlResults::new(doc.head.vars, rows))
}

pub struct HttpTripleStore {
    endpoint: String,
    credentials: Option<(String, Option<String>)>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTripleStore {
    pub fn new(config: &TripleStoreConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            client,
            timeout,
        })
    }
}

#[async_trait]
impl TripleStore for HttpTripleStore {
    async fn execute(&self, query: &str) -> Result<SparqlResults, TripleStoreError> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, RESULTS_JSON)
            .form(&[("query", query)]);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TripleStoreError::Timeout(self.timeout)
            } else {
                TripleStoreError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TripleStoreError::Transport(e.to_string()))?;
        if !status.is_success() {
            // The store's message is what the query regeneration works from.
            return Err(TripleStoreError::Execution(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let results = parse_results(&body)?;
        debug!(
            rows = results.rows.len(),
            vars = ?results.metadata.variables,
            duration_ms = start.elapsed().as_millis() as u64,
            "SPARQL query executed"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ACME: &str = r#"{
        "head": {"vars": ["supplierName", "country", "risk"]},
        "results": {"bindings": [
            {"risk": {"type": "literal", "value": "High"},
             "supplierName": {"type": "literal", "value": "Acme Co"},
             "country": {"type": "uri", "value": "http://sap.com/rag/Russia"}},
            {"supplierName": {"type": "literal", "value": "Globex"}}
        ]}
    }"#;

    fn config(endpoint: String) -> TripleStoreConfig {
        TripleStoreConfig {
            endpoint,
            ..TripleStoreConfig::default()
        }
    }

    #[test]
    fn test_parse_orders_columns_by_head() {
        let results = parse_results(ACME).unwrap();
        assert_eq!(results.metadata.variables, vec!["supplierName", "country", "risk"]);
        assert_eq!(results.rows.len(), 2);
        assert_eq!(
            results.rows[0].columns().collect::<Vec<_>>(),
            vec!["supplierName", "country", "risk"]
        );
        assert!(results.rows[0].get("country").unwrap().is_iri());
        assert_eq!(results.rows[1].len(), 1);
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        let empty = parse_results(r#"{"head": {"vars": ["risk"]}, "results": {"bindings": []}}"#).unwrap();
        assert!(empty.is_empty());

        assert!(matches!(
            parse_results(r#"{"head": {}, "boolean": true}"#),
            Err(TripleStoreError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_results("<html>"),
            Err(TripleStoreError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_posts_form_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sparql")
            .match_header("accept", RESULTS_JSON)
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::UrlEncoded(
                "query".to_string(),
                "SELECT ?risk WHERE { ?c rag:hasGeopoliticalRisk ?risk }".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", RESULTS_JSON)
            .with_body(ACME)
            .create_async()
            .await;

        let store = HttpTripleStore::new(&config(format!("{}/sparql", server.url()))).unwrap();
        let results = store
            .execute("SELECT ?risk WHERE { ?c rag:hasGeopoliticalRisk ?risk }")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(results.rows[0].value("supplierName"), Some("Acme Co"));
    }

    #[tokio::test]
    async fn test_execution_error_carries_server_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sparql")
            .with_status(400)
            .with_body("Virtuoso 37000 Error SP030: SPARQL compiler, line 3: syntax error at 'WHERE'\n")
            .create_async()
            .await;

        let store = HttpTripleStore::new(&config(format!("{}/sparql", server.url()))).unwrap();
        match store.execute("SELECT WHERE").await.unwrap_err() {
            TripleStoreError::Execution(msg) => {
                assert!(msg.starts_with("HTTP 400"));
                assert!(msg.contains("syntax error at 'WHERE'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_basic_auth_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sparql")
            .match_header("authorization", "Basic cmFnOnNlY3JldA==")
            .with_status(200)
            .with_body(r#"{"head": {"vars": []}, "results": {"bindings": []}}"#)
            .create_async()
            .await;

        let store = HttpTripleStore::new(&TripleStoreConfig {
            endpoint: format!("{}/sparql", server.url()),
            username: Some("rag".to_string()),
            password: Some("secret".to_string()),
            ..TripleStoreConfig::default()
        })
        .unwrap();
        store.execute("ASK {}").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transport_error() {
        let store = HttpTripleStore::new(&config("http://127.0.0.1:9/sparql".to_string())).unwrap();
        assert!(matches!(
            store.execute("SELECT * WHERE {}").await,
            Err(TripleStoreError::Transport(_) | TripleStoreError::Timeout(_))
        ));
    }
}
