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

//! Versioned prompt templates and the RDF schema description they embed.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` render as literal braces
//! so SPARQL examples can be written verbatim.

pub mod schema;

use parking_lot::RwLock;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use schema::{PredicateSpec, RdfSchemaContext, SchemaError};

/// Template that turns a question into a SPARQL query.
pub const SPARQL_GENERATION: &str = "sparql_generation";
/// Template that repairs a query after an execution error.
pub const SPARQL_RECOVERY: &str = "sparql_recovery";
/// Template that synthesizes the grounded answer.
pub const FINAL_ANSWER: &str = "final_answer";

const SPARQL_GENERATION_TEXT: &str = include_str!("../templates/sparql_generation.txt");
const SPARQL_RECOVERY_TEXT: &str = include_str!("../templates/sparql_recovery.txt");
const FINAL_ANSWER_TEXT: &str = include_str!("../templates/final_answer.txt");

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Prompt not found: {0}")]
    NotFound(String),
    #[error("Missing value for prompt variable '{0}'")]
    MissingVariable(String),
    #[error("Placeholder '{0}' is not a declared variable")]
    UndeclaredVariable(String),
    #[error("Declared variable '{0}' never appears in the template")]
    UnusedVariable(String),
    #[error("Malformed template at byte {0}")]
    Malformed(usize),
    #[error("Storage error: {0}")]
    StorageError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub version: Version,
    pub template: String,
    pub variables: Vec<String>,
}

impl PromptTemplate {
    /// Build a template, checking that placeholders and declared variables agree.
    pub fn new(
        name: impl Into<String>,
        version: Version,
        template: impl Into<String>,
        variables: &[&str],
    ) -> Result<Self, PromptError> {
        let prompt = Self {
            name: name.into(),
            version,
            template: template.into(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        };
        prompt.validate()?;
        Ok(prompt)
    }

    /// Placeholders referenced by the template body, in first-seen order.
    pub fn placeholders(&self) -> Result<Vec<String>, PromptError> {
        let mut seen = Vec::new();
        for segment in parse_segments(&self.template)? {
            if let Segment::Placeholder(name) = segment {
                if !seen.iter().any(|s: &String| s == name) {
                    seen.push(name.to_string());
                }
            }
        }
        Ok(seen)
    }

    pub fn validate(&self) -> Result<(), PromptError> {
        let placeholders = self.placeholders()?;
        for p in &placeholders {
            if !self.variables.contains(p) {
                return Err(PromptError::UndeclaredVariable(p.clone()));
            }
        }
        for v in &self.variables {
            if !placeholders.contains(v) {
                return Err(PromptError::UnusedVariable(v.clone()));
            }
        }
        Ok(())
    }

    /// Substitute every placeholder from `bindings`.
    ///
    /// Extra bindings are ignored; a declared variable without a binding is an error.
    pub fn render(&self, bindings: &PromptBindings) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.template.len() + bindings.total_len());
        for segment in parse_segments(&self.template)? {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Brace(c) => out.push(c),
                Segment::Placeholder(name) => {
                    if !self.variables.iter().any(|v| v == name) {
                        return Err(PromptError::UndeclaredVariable(name.to_string()));
                    }
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| PromptError::MissingVariable(name.to_string()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Named values substituted into a [`PromptTemplate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptBindings {
    values: HashMap<String, String>,
}

impl PromptBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn total_len(&self) -> usize {
        self.values.values().map(String::len).sum()
    }
}

enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn parse_segments(template: &str) -> Result<Vec<Segment<'_>>, PromptError> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                if start < i {
                    segments.push(Segment::Text(&template[start..i]));
                }
                segments.push(Segment::Brace(bytes[i] as char));
                i += 2;
                start = i;
            }
            b'{' => {
                if start < i {
                    segments.push(Segment::Text(&template[start..i]));
                }
                let close = template[i + 1..]
                    .find('}')
                    .map(|p| i + 1 + p)
                    .ok_or(PromptError::Malformed(i))?;
                let name = &template[i + 1..close];
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(PromptError::Malformed(i));
                }
                segments.push(Segment::Placeholder(name));
                i = close + 1;
                start = i;
            }
            b'}' => return Err(PromptError::Malformed(i)),
            _ => i += 1,
        }
    }

    if start < bytes.len() {
        segments.push(Segment::Text(&template[start..]));
    }
    Ok(segments)
}

/// Bump the minor version for a compatible change, the major one otherwise.
pub fn bump_version(current: &Version, breaking: bool) -> Version {
    let mut new = current.clone();
    if breaking {
        new.major += 1;
        new.minor = 0;
        new.patch = 0;
    } else {
        new.minor += 1;
        new.patch = 0;
    }
    new
}

/// In-memory registry of prompt templates keyed by name, keeping every version.
#[derive(Default)]
pub struct PromptLibrary {
    prompts: RwLock<HashMap<String, Vec<Arc<PromptTemplate>>>>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding the three pipeline templates shipped with the crate.
    pub fn builtin() -> Result<Self, PromptError> {
        let library = Self::new();
        let v1 = Version::new(1, 0, 0);
        library.register(PromptTemplate::new(
            SPARQL_GENERATION,
            v1.clone(),
            SPARQL_GENERATION_TEXT,
            &["rdf_context", "question"],
        )?);
        library.register(PromptTemplate::new(
            SPARQL_RECOVERY,
            v1.clone(),
            SPARQL_RECOVERY_TEXT,
            &["rdf_context", "question", "bad_query", "error_message"],
        )?);
        library.register(PromptTemplate::new(
            FINAL_ANSWER,
            v1,
            FINAL_ANSWER_TEXT,
            &["vector_context", "sparql_context", "question"],
        )?);
        Ok(library)
    }

    pub fn register(&self, prompt: PromptTemplate) {
        let mut prompts = self.prompts.write();
        let versions = prompts.entry(prompt.name.clone()).or_default();
        versions.push(Arc::new(prompt));
        versions.sort_by(|a, b| a.version.cmp(&b.version));
    }

    /// Latest version of `name`.
    pub fn get(&self, name: &str) -> Result<Arc<PromptTemplate>, PromptError> {
        self.prompts
            .read()
            .get(name)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| PromptError::NotFound(name.to_string()))
    }

    pub fn get_version(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<Arc<PromptTemplate>, PromptError> {
        self.prompts
            .read()
            .get(name)
            .and_then(|versions| versions.iter().find(|p| &p.version == version).cloned())
            .ok_or_else(|| PromptError::NotFound(format!("{}@{}", name, version)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prompts.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace registered templates with `<dir>/<name>.txt` where such a file exists.
    ///
    /// An override keeps the variables of the template it replaces and is
    /// registered as the next minor version. Returns the names overridden.
    pub fn load_overrides(&self, dir: &Path) -> Result<Vec<String>, PromptError> {
        let mut overridden = Vec::new();
        for name in self.names() {
            let path = dir.join(format!("{}.txt", name));
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .map_err(|e| PromptError::StorageError(format!("{}: {}", path.display(), e)))?;
            let current = self.get(&name)?;
            let variables: Vec<&str> = current.variables.iter().map(String::as_str).collect();
            let prompt = PromptTemplate::new(
                name.clone(),
                bump_version(&current.version, false),
                text,
                &variables,
            )?;
            tracing::info!(prompt = %name, version = %prompt.version, "Loaded prompt override");
            self.register(prompt);
            overridden.push(name);
        }
        Ok(overridden)
    }
}
