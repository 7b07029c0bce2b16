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

//! SPARQL SELECT results in the shape the pipeline consumes.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Uri,
    #[serde(alias = "typed-literal")]
    Literal,
    Bnode,
}

/// A single bound value, deserializable from the SPARQL 1.1 JSON results format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub kind: TermKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl RdfTerm {
    pub fn iri(value: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Uri,
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Literal,
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    pub fn is_iri(&self) -> bool {
        self.kind == TermKind::Uri
    }
}

/// One solution of a SELECT query. Column order follows the query projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredRow {
    bindings: Vec<(String, RdfTerm)>,
}

impl StructuredRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, variable: impl Into<String>, term: RdfTerm) -> Self {
        self.push(variable, term);
        self
    }

    /// Bind `variable`, replacing any earlier binding in place.
    pub fn push(&mut self, variable: impl Into<String>, term: RdfTerm) {
        let variable = variable.into();
        match self.bindings.iter_mut().find(|(v, _)| *v == variable) {
            Some(slot) => slot.1 = term,
            None => self.bindings.push((variable, term)),
        }
    }

    pub fn get(&self, variable: &str) -> Option<&RdfTerm> {
        self.bindings
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, t)| t)
    }

    pub fn value(&self, variable: &str) -> Option<&str> {
        self.get(variable).map(|t| t.value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(v, _)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RdfTerm)> {
        self.bindings.iter().map(|(v, t)| (v.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Render as a flat JSON object of column to value, keeping column order.
    pub fn to_json_line(&self) -> String {
        let mut out = String::from("{");
        for (i, (variable, term)) in self.bindings.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(
                out,
                "{}: {}",
                serde_json::Value::from(variable.as_str()),
                serde_json::Value::from(term.value.as_str())
            );
        }
        out.push('}');
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Projected variables from the response head, including unbound ones.
    pub variables: Vec<String>,
}

/// Outcome of a successful SELECT. An empty `rows` is a valid answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparqlResults {
    pub rows: Vec<StructuredRow>,
    pub metadata: ResultMetadata,
}

impl SparqlResults {
    pub fn new(variables: Vec<String>, rows: Vec<StructuredRow>) -> Self {
        Self {
            rows,
            metadata: ResultMetadata { variables },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Text substituted for the structured context: one JSON object per line.
pub fn render_rows(rows: &[StructuredRow]) -> String {
    rows.iter()
        .map(StructuredRow::to_json_line)
        .collect::<Vec<_>>()
        .join("\n")
}
