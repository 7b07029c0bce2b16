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

//! Description of the supplier knowledge graph given to the query generator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

const SUPPLIERS_SCHEMA: &str = include_str!("../schema/suppliers.toml");

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid schema file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Schema inconsistency: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredicateSpec {
    pub name: String,
    pub variable: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpec {
    pub identified_by: String,
    pub predicates: Vec<PredicateSpec>,
}

/// Static ontology of the supplier graph, embedded in every query prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RdfSchemaContext {
    pub prefix: String,
    pub namespace: String,
    pub graph: String,
    /// Query variables the generator may select.
    pub variables: Vec<String>,
    pub examples: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    pub supplier: EntitySpec,
    pub country: EntitySpec,
}

impl RdfSchemaContext {
    /// The schema written by the supplier ingestion job.
    pub fn suppliers() -> Result<Self, SchemaError> {
        Self::from_toml(SUPPLIERS_SCHEMA)
    }

    pub fn from_toml(text: &str) -> Result<Self, SchemaError> {
        let schema: Self = toml::from_str(text)?;
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let predicates = self.supplier.predicates.iter().chain(&self.country.predicates);
        for predicate in predicates {
            if !self.variables.contains(&predicate.variable) {
                return Err(SchemaError::Inconsistent(format!(
                    "predicate {}:{} binds ?{} which is not a query variable",
                    self.prefix, predicate.name, predicate.variable
                )));
            }
        }
        for (alias, target) in &self.aliases {
            if !self.variables.contains(target) {
                return Err(SchemaError::Inconsistent(format!(
                    "alias ?{} points at unknown variable ?{}",
                    alias, target
                )));
            }
        }
        Ok(())
    }

    /// Whitelisted variable a result column stands for, following aliases.
    pub fn resolve_variable<'a>(&'a self, column: &'a str) -> Option<&'a str> {
        if self.variables.iter().any(|v| v == column) {
            Some(column)
        } else {
            self.aliases.get(column).map(String::as_str)
        }
    }

    /// Result columns that are neither whitelisted variables nor aliases.
    pub fn check_variables<S: AsRef<str>>(&self, columns: &[S]) -> Vec<String> {
        columns
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| self.resolve_variable(c).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Prose block substituted for `{rdf_context}`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Your RDF graph uses the following structure:");
        let _ = writeln!(out);
        let _ = writeln!(out, "Namespaces:");
        let _ = writeln!(out, "- {}: <{}>", self.prefix, self.namespace);
        let _ = writeln!(out);
        let _ = writeln!(out, "Named graph: <{}>", self.graph);
        let _ = writeln!(out);
        self.render_entity(&mut out, "Supplier", &self.supplier);
        let _ = writeln!(out);
        self.render_entity(&mut out, "Country", &self.country);
        let _ = writeln!(out);
        let _ = writeln!(out, "Example triples:");
        for example in &self.examples {
            let _ = writeln!(out, "- {}", example);
        }
        out
    }

    fn render_entity(&self, out: &mut String, label: &str, entity: &EntitySpec) {
        let _ = writeln!(
            out,
            "{} entities (identified by {}) have the following properties:",
            label, entity.identified_by
        );
        for predicate in &entity.predicates {
            let _ = writeln!(
                out,
                "- {}:{} -> {}",
                self.prefix, predicate.name, predicate.description
            );
        }
    }
}
