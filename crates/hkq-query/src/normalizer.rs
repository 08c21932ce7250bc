//! Result normalization
//!
//! Maps a store's binding set back to language-tagged facts using the output
//! variables declared by the compiled query.

use std::collections::HashSet;

use tracing::{debug, warn};

use hkq_core::{
    BindingRow, BindingSet, BindingValue, CompiledQuery, Datatype, EntityId, Fact, FactValue,
    Language, Literal, NormalizedResult, ValueKind,
};
use hkq_ontology::LabelIndex;

/// Default cap on returned facts
pub const DEFAULT_MAX_ROWS: usize = 10;

/// Normalizes binding sets against one label index snapshot
#[derive(Debug, Clone)]
pub struct ResultNormalizer<'a> {
    index: &'a LabelIndex,
    max_rows: usize,
}

impl<'a> ResultNormalizer<'a> {
    pub fn new(index: &'a LabelIndex, max_rows: usize) -> Self {
        Self {
            index,
            max_rows: max_rows.max(1),
        }
    }

    /// Turn bindings into facts, or `NoResults` when nothing usable came back.
    ///
    /// Rows that do not match the declared output shape are skipped. Rows
    /// whose displayed values coincide are collapsed, keeping first-seen order.
    pub fn normalize(
        &self,
        bindings: &BindingSet,
        query: &CompiledQuery,
        language: Language,
    ) -> NormalizedResult {
        if bindings.is_empty() {
            return NormalizedResult::NoResults;
        }

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for (position, row) in bindings.rows.iter().enumerate() {
            let fact = match self.fact(row, query, language) {
                Ok(fact) => fact,
                Err(reason) => {
                    warn!(intent = %query.intent, row = position, %reason, "Skipping inconsistent binding row");
                    skipped += 1;
                    continue;
                }
            };

            let key: Vec<(String, String)> = fact
                .iter()
                .map(|(variable, value)| (variable.clone(), value.display()))
                .collect();
            if seen.insert(key) {
                rows.push(fact);
            }
        }

        if rows.is_empty() {
            if skipped > 0 {
                warn!(intent = %query.intent, skipped, "Every binding row was inconsistent");
            }
            return NormalizedResult::NoResults;
        }

        let truncated = rows.len() > self.max_rows;
        rows.truncate(self.max_rows);
        debug!(
            intent = %query.intent,
            received = bindings.len(),
            facts = rows.len(),
            truncated,
            "Normalized bindings"
        );

        NormalizedResult::Facts { rows, truncated }
    }

    fn fact(
        &self,
        row: &BindingRow,
        query: &CompiledQuery,
        language: Language,
    ) -> Result<Fact, String> {
        let mut fact = Fact::new();

        for output in &query.output {
            let Some(value) = row.get(&output.name) else {
                if output.optional {
                    continue;
                }
                return Err(format!("required variable '{}' is unbound", output.name));
            };

            let normalized = match (&output.kind, value) {
                (ValueKind::Entity { .. }, BindingValue::Iri { value }) => {
                    self.entity(EntityId::new(value.as_str()), language)
                }
                (ValueKind::Entity { .. }, other) => {
                    return Err(format!(
                        "'{}' should be an entity, got '{}'",
                        output.name,
                        other.lexical()
                    ))
                }
                (ValueKind::Literal { datatype }, BindingValue::Literal { value, .. }) => {
                    let literal = typed_literal(value, *datatype).ok_or_else(|| {
                        format!("'{}' is not a valid {datatype}: '{value}'", output.name)
                    })?;
                    FactValue::Literal { value: literal }
                }
                (ValueKind::Literal { datatype }, other) => {
                    return Err(format!(
                        "'{}' should be a {datatype} literal, got '{}'",
                        output.name,
                        other.lexical()
                    ))
                }
            };
            fact.insert(output.name.clone(), normalized);
        }

        if fact.is_empty() {
            return Err("no declared variable is bound".to_string());
        }
        Ok(fact)
    }

    /// Label in the requested language, then any other language, then the
    /// identifier's local name
    fn entity(&self, id: EntityId, language: Language) -> FactValue {
        match self.index.label_for(&id, language) {
            Some((label, label_language)) => FactValue::Entity {
                label: label.to_string(),
                language: Some(label_language),
                id,
            },
            None => FactValue::Entity {
                label: id.local_name().to_string(),
                language: None,
                id,
            },
        }
    }
}

fn typed_literal(value: &str, datatype: Datatype) -> Option<Literal> {
    match datatype {
        // Strings pass through untouched, including empty ones
        Datatype::String => Some(Literal::String(value.to_string())),
        other => other.parse(value),
    }
}
