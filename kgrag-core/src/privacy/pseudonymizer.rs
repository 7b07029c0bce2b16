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

use crate::field::SupplierField;
use crate::sparql::{RdfTerm, StructuredRow};
use kgrag_prompts::RdfSchemaContext;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

pub const PLACEHOLDER_PREFIX: &str = "MASKED_";

/// Matches whole placeholders only, so `_1` never claims a prefix of `_10`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MASKED_[A-Z]+_[0-9]+").expect("placeholder pattern is valid"));

/// Namespace and column aliases used to normalise values before masking.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskingRules {
    pub namespace: String,
    pub prefix: String,
    pub aliases: BTreeMap<String, String>,
}

impl Default for MaskingRules {
    fn default() -> Self {
        Self {
            namespace: "http://sap.com/rag/".to_string(),
            prefix: "rag".to_string(),
            aliases: BTreeMap::from([("supplier".to_string(), "supplierName".to_string())]),
        }
    }
}

impl From<&RdfSchemaContext> for MaskingRules {
    fn from(schema: &RdfSchemaContext) -> Self {
        Self {
            namespace: schema.namespace.clone(),
            prefix: schema.prefix.clone(),
            aliases: schema.aliases.clone(),
        }
    }
}

impl MaskingRules {
    /// Drop the graph namespace IRI or `prefix:` from the front of `value`.
    pub fn strip_namespace<'a>(&self, value: &'a str) -> &'a str {
        if let Some(rest) = value.strip_prefix(self.namespace.as_str()) {
            return rest;
        }
        value
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(value)
    }

    fn canonical<'a>(&'a self, column: &'a str) -> &'a str {
        self.aliases.get(column).map(String::as_str).unwrap_or(column)
    }

    pub fn field(&self, column: &str) -> Option<SupplierField> {
        SupplierField::from_variable(self.canonical(column))
    }
}

/// Request-scoped bidirectional mapping between sensitive values and
/// placeholders of the form `MASKED_<FIELD>_<n>`.
///
/// A single counter numbers placeholders across all fields, starting at 1.
/// Never share an instance between requests.
#[derive(Debug, Default)]
pub struct Pseudonymizer {
    rules: MaskingRules,
    forward: HashMap<(String, String), String>,
    reverse: HashMap<String, String>,
    counter: u64,
}

impl Pseudonymizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: MaskingRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn for_schema(schema: &RdfSchemaContext) -> Self {
        Self::with_rules(MaskingRules::from(schema))
    }

    pub fn rules(&self) -> &MaskingRules {
        &self.rules
    }

    /// Placeholder for `value` under `field`, minting one on first sight.
    ///
    /// The graph namespace is stripped first, so restoring yields the
    /// short local name rather than the full IRI.
    pub fn pseudonymize(&mut self, field: &str, value: &str) -> String {
        let field = self.rules.canonical(field).to_string();
        let value = self.rules.strip_namespace(value).to_string();
        let key = (field, value);
        if let Some(existing) = self.forward.get(&key) {
            return existing.clone();
        }

        self.counter += 1;
        let placeholder = format!("{}{}_{}", PLACEHOLDER_PREFIX, tag(&key.0), self.counter);
        self.reverse.insert(placeholder.clone(), key.1.clone());
        self.forward.insert(key, placeholder.clone());
        placeholder
    }

    /// Copy of `rows` with every sensitive column masked.
    ///
    /// Every other column is passed through unchanged; columns outside the
    /// supplier catalogue are logged.
    pub fn pseudonymize_rows(&mut self, rows: &[StructuredRow]) -> Vec<StructuredRow> {
        let mut unknown: HashSet<String> = HashSet::new();
        let masked: Vec<StructuredRow> = rows
            .iter()
            .map(|row| {
                let mut out = StructuredRow::new();
                for (column, term) in row.iter() {
                    let term = match self.rules.field(column) {
                        Some(field) if field.is_sensitive() => {
                            RdfTerm::literal(self.pseudonymize(column, &term.value))
                        }
                        known => {
                            if known.is_none() && unknown.insert(column.to_string()) {
                                debug!(column, "Column outside the supplier catalogue left unmasked");
                            }
                            term.clone()
                        }
                    };
                    out.push(column, term);
                }
                out
            })
            .collect();
        debug!(rows = masked.len(), placeholders = self.len(), "Pseudonymized result rows");
        masked
    }

    /// Replace every known placeholder in `text` with its original value.
    ///
    /// Unknown placeholder-shaped tokens are left as they are.
    pub fn restore<'t>(&self, text: &'t str) -> Cow<'t, str> {
        if self.reverse.is_empty() {
            return Cow::Borrowed(text);
        }
        PLACEHOLDER.replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            match self.reverse.get(token) {
                Some(original) => original.clone(),
                None => token.to_string(),
            }
        })
    }

    pub fn original(&self, placeholder: &str) -> Option<&str> {
        self.reverse.get(placeholder).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

fn tag(field: &str) -> String {
    let tag: String = field
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if tag.is_empty() {
        "FIELD".to_string()
    } else {
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::render_rows;
    use proptest::prelude::*;

    fn supplier_row(name: &str, email: &str, country: &str, risk: &str) -> StructuredRow {
        StructuredRow::new()
            .with("supplierName", RdfTerm::literal(name))
            .with("email", RdfTerm::literal(email))
            .with("country", RdfTerm::iri(country))
            .with("risk", RdfTerm::literal(risk))
    }

    #[test]
    fn test_placeholder_format_and_shared_counter() {
        let mut p = Pseudonymizer::new();
        assert_eq!(p.pseudonymize("supplierName", "Acme Co"), "MASKED_SUPPLIERNAME_1");
        assert_eq!(p.pseudonymize("email", "ops@acme.example"), "MASKED_EMAIL_2");
        assert_eq!(p.pseudonymize("supplierName", "Globex"), "MASKED_SUPPLIERNAME_3");
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_same_value_same_placeholder() {
        let mut p = Pseudonymizer::new();
        let first = p.pseudonymize("supplierName", "Acme Co");
        let again = p.pseudonymize("supplierName", "Acme Co");
        assert_eq!(first, again);
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_alias_shares_mapping() {
        let mut p = Pseudonymizer::new();
        let a = p.pseudonymize("supplier", "Acme Co");
        let b = p.pseudonymize("supplierName", "Acme Co");
        assert_eq!(a, "MASKED_SUPPLIERNAME_1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_is_stripped_before_masking() {
        let mut p = Pseudonymizer::new();
        let placeholder = p.pseudonymize("supplierName", "http://sap.com/rag/Acme_Co");
        assert_eq!(p.original(&placeholder), Some("Acme_Co"));
        assert_eq!(p.pseudonymize("supplierName", "rag:Acme_Co"), placeholder);
        assert_eq!(p.restore(&format!("Ask {}.", placeholder)), "Ask Acme_Co.");
    }

    #[test]
    fn test_restore_does_not_confuse_prefixes() {
        let mut p = Pseudonymizer::new();
        for i in 1..=10 {
            p.pseudonymize("supplierName", &format!("Supplier {}", i));
        }
        assert_eq!(
            p.restore("MASKED_SUPPLIERNAME_10 and MASKED_SUPPLIERNAME_1"),
            "Supplier 10 and Supplier 1"
        );
    }

    #[test]
    fn test_restore_leaves_unknown_tokens() {
        let mut p = Pseudonymizer::new();
        p.pseudonymize("supplierName", "Acme Co");
        let text = "MASKED_SUPPLIERNAME_1 beat MASKED_SUPPLIERNAME_7 and MASKED_EMAIL_1";
        assert_eq!(p.restore(text), "Acme Co beat MASKED_SUPPLIERNAME_7 and MASKED_EMAIL_1");
    }

    #[test]
    fn test_restore_without_mapping_borrows() {
        let p = Pseudonymizer::new();
        assert!(matches!(p.restore("nothing to do"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_rows_mask_sensitive_columns_only() {
        let mut p = Pseudonymizer::new();
        let rows = vec![
            supplier_row("Acme Co", "ops@acme.example", "http://sap.com/rag/North_Korea", "High"),
            supplier_row("Acme Co", "sales@acme.example", "http://sap.com/rag/North_Korea", "High"),
        ];
        let masked = p.pseudonymize_rows(&rows);

        assert_eq!(masked[0].value("supplierName"), Some("MASKED_SUPPLIERNAME_1"));
        assert_eq!(masked[1].value("supplierName"), Some("MASKED_SUPPLIERNAME_1"));
        assert_eq!(masked[0].value("email"), Some("MASKED_EMAIL_2"));
        assert_eq!(masked[1].value("email"), Some("MASKED_EMAIL_3"));
        assert_eq!(masked[0].value("country"), Some("http://sap.com/rag/North_Korea"));
        assert_eq!(masked[0].value("risk"), Some("High"));
        assert_eq!(
            masked[0].columns().collect::<Vec<_>>(),
            vec!["supplierName", "email", "country", "risk"]
        );
    }

    #[test]
    fn test_non_sensitive_iris_are_left_intact() {
        let mut p = Pseudonymizer::new();
        let rows = vec![StructuredRow::new()
            .with("supplierName", RdfTerm::iri("http://sap.com/rag/Acme_Co"))
            .with("country", RdfTerm::iri("http://sap.com/rag/North_Korea"))
            .with("supplierType", RdfTerm::iri("rag:Manufacturer"))
            .with("city", RdfTerm::iri("http://sap.com/rag/Pyongyang"))
            .with("partner", RdfTerm::iri("http://sap.com/rag/Globex"))];
        let masked = p.pseudonymize_rows(&rows);

        assert_eq!(masked[0].value("supplierName"), Some("MASKED_SUPPLIERNAME_1"));
        for column in ["country", "supplierType", "city", "partner"] {
            assert_eq!(masked[0].get(column), rows[0].get(column), "{}", column);
        }
    }

    #[test]
    fn test_unknown_columns_pass_through() {
        let mut p = Pseudonymizer::new();
        let rows = vec![StructuredRow::new()
            .with("supplier", RdfTerm::literal("Acme Co"))
            .with("revenue", RdfTerm::literal("12M"))];
        let masked = p.pseudonymize_rows(&rows);
        assert_eq!(masked[0].value("supplier"), Some("MASKED_SUPPLIERNAME_1"));
        assert_eq!(masked[0].value("revenue"), Some("12M"));
    }

    #[test]
    fn test_strip_namespace() {
        let rules = MaskingRules::default();
        assert_eq!(rules.strip_namespace("http://sap.com/rag/Acme_Co"), "Acme_Co");
        assert_eq!(rules.strip_namespace("rag:North_Korea"), "North_Korea");
        assert_eq!(rules.strip_namespace("https://acme.example/"), "https://acme.example/");
        assert_eq!(rules.strip_namespace("ragtime"), "ragtime");
    }

    #[test]
    fn test_rules_from_schema() {
        let schema = RdfSchemaContext::suppliers().unwrap();
        let p = Pseudonymizer::for_schema(&schema);
        assert_eq!(p.rules(), &MaskingRules::default());
    }

    /// One value per catalogue column; sensitive values carry a `Zq` marker
    /// that cannot occur in placeholders or in the non-sensitive values.
    fn full_row() -> impl Strategy<Value = Vec<(SupplierField, String, bool)>> {
        SupplierField::ALL
            .iter()
            .map(|&field| {
                let value = if field.is_sensitive() {
                    "Zq[A-Za-z0-9 ]{0,12}".boxed()
                } else {
                    "[a-z ]{1,12}".boxed()
                };
                (Just(field), value, any::<bool>())
            })
            .collect::<Vec<_>>()
    }

    fn build_row(cells: &[(SupplierField, String, bool)]) -> StructuredRow {
        let mut row = StructuredRow::new();
        for (field, value, as_iri) in cells {
            let term = if *as_iri {
                RdfTerm::iri(format!("http://sap.com/rag/{}", value))
            } else {
                RdfTerm::literal(value.clone())
            };
            row.push(field.variable(), term);
        }
        row
    }

    proptest! {
        #[test]
        fn prop_rows_round_trip_every_sensitive_field(
            table in proptest::collection::vec(full_row(), 1..6),
        ) {
            let rows: Vec<StructuredRow> = table.iter().map(|cells| build_row(cells)).collect();
            let mut p = Pseudonymizer::new();
            let masked = p.pseudonymize_rows(&rows);
            let rendered = render_rows(&masked);
            let restored = p.restore(&rendered).into_owned();

            for (cells, (original, masked_row)) in table.iter().zip(rows.iter().zip(&masked)) {
                for (field, value, _) in cells {
                    let column = field.variable();
                    if field.is_sensitive() {
                        prop_assert!(masked_row.value(column).unwrap().starts_with(PLACEHOLDER_PREFIX));
                        prop_assert!(!rendered.contains(value.as_str()));
                        let expected = format!("\"{}\": \"{}\"", column, value);
                        prop_assert!(restored.contains(&expected), "missing {}", expected);
                    } else {
                        prop_assert_eq!(masked_row.get(column), original.get(column));
                    }
                }
            }
        }

        #[test]
        fn prop_restore_inverts_masking(
            values in proptest::collection::vec("[A-Za-z0-9 .&'-]{1,24}", 1..12),
            filler in "[a-z ,.]{0,16}",
        ) {
            let mut p = Pseudonymizer::new();
            let placeholders: Vec<String> =
                values.iter().map(|v| p.pseudonymize("supplierName", v)).collect();

            for (value, placeholder) in values.iter().zip(&placeholders) {
                prop_assert!(placeholder.starts_with(PLACEHOLDER_PREFIX));
                let text = format!("{}{}{}", filler, placeholder, filler);
                let expected = format!("{}{}{}", filler, value, filler);
                prop_assert_eq!(p.restore(&text).into_owned(), expected);
            }
        }

        #[test]
        fn prop_distinct_values_get_distinct_placeholders(
            values in proptest::collection::hash_set("[A-Za-z ]{1,16}", 1..20),
        ) {
            let mut p = Pseudonymizer::new();
            let placeholders: HashSet<String> =
                values.iter().map(|v| p.pseudonymize("email", v)).collect();
            prop_assert_eq!(placeholders.len(), values.len());
            prop_assert_eq!(p.len(), values.len());
        }
    }
}
