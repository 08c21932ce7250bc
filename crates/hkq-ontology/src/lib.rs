//! HKQ Ontology - Schema, label index and entity resolution
//!
//! Provides the knowledge snapshot every turn resolves against:
//! - [`Schema`]: classes, properties and entities of the ontology document
//! - [`LabelIndex`]: multilingual (language, text) → candidate lookup
//! - [`EntityResolver`]: slot text → resolved / ambiguous / unresolved
//!
//! A [`KnowledgeBase`] pairs a schema with the index built from it and is
//! never mutated. [`SharedKnowledge`] holds the current snapshot and swaps it
//! atomically on reload.

pub mod index;
pub mod normalize;
pub mod resolver;
pub mod schema;

pub use index::{IndexStats, LabelIndex};
pub use normalize::normalize_label;
pub use resolver::EntityResolver;
pub use schema::{OntologyDocument, PropertyRange, Schema, SchemaProperty};

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use hkq_core::{AppConfig, HkqError, Language, Result};

/// The ontology document bundled with the crate
pub const BUILTIN_ONTOLOGY: &str = include_str!("../data/humanitarian.json");

/// An immutable (schema, label index) pair
#[derive(Debug)]
pub struct KnowledgeBase {
    pub schema: Schema,
    pub index: LabelIndex,
}

impl KnowledgeBase {
    /// Index a validated schema
    pub fn new(schema: Schema, languages: &[Language], min_partial_length: usize) -> Self {
        let index = LabelIndex::build_with(&schema, languages, min_partial_length);
        info!(
            entities = schema.entity_count(),
            labels = index.stats().labels,
            "Knowledge base ready"
        );
        Self { schema, index }
    }

    /// Parse, validate and index a JSON ontology document
    pub fn from_json(json: &str, languages: &[Language], min_partial_length: usize) -> Result<Self> {
        let schema = Schema::from_json(json)?;
        Ok(Self::new(schema, languages, min_partial_length))
    }

    /// The bundled humanitarian ontology
    pub fn builtin(languages: &[Language]) -> Result<Self> {
        Self::from_json(BUILTIN_ONTOLOGY, languages, index::DEFAULT_MIN_PARTIAL_LENGTH)
    }

    /// Load from a file
    pub fn from_path(path: &Path, languages: &[Language], min_partial_length: usize) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            HkqError::InvalidOntology(format!("cannot read {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loading ontology document");
        Self::from_json(&json, languages, min_partial_length)
    }

    /// Load the configured ontology, or the bundled one when no path is set
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let languages = &config.ontology.languages;
        let min_partial_length = config.resolver.min_partial_length;

        match &config.ontology.path {
            Some(path) => Self::from_path(path, languages, min_partial_length),
            None => Self::from_json(BUILTIN_ONTOLOGY, languages, min_partial_length),
        }
    }
}

/// The current knowledge snapshot, shared across concurrent turns
#[derive(Debug)]
pub struct SharedKnowledge {
    current: RwLock<Arc<KnowledgeBase>>,
}

impl SharedKnowledge {
    pub fn new(knowledge: KnowledgeBase) -> Self {
        Self {
            current: RwLock::new(Arc::new(knowledge)),
        }
    }

    /// The snapshot in effect now; stays valid for the caller after a swap
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Install a fully built snapshot, returning the previous one
    pub fn replace(&self, knowledge: KnowledgeBase) -> Arc<KnowledgeBase> {
        let next = Arc::new(knowledge);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, next);
        info!(
            entities = guard.schema.entity_count(),
            "Knowledge snapshot swapped"
        );
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkq_core::EntityId;

    #[test]
    fn test_builtin_ontology_loads() {
        let kb = KnowledgeBase::builtin(&Language::ALL).unwrap();

        assert!(kb.schema.entity_count() > 20);
        assert!(kb.schema.class("HealthFacility").is_some());
        assert!(kb.index.supports(Language::Sw));
        // clinic_goma carries no labels
        let clinic = EntityId::new("http://example.org/humanitarian#clinic_goma");
        assert!(kb.index.label_for(&clinic, Language::Sw).is_none());
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedKnowledge::new(KnowledgeBase::builtin(&Language::ALL).unwrap());
        let before = shared.snapshot();

        let previous = shared.replace(KnowledgeBase::builtin(&[Language::Sw]).unwrap());

        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.index.languages().len(), 3);
        assert_eq!(shared.snapshot().index.languages(), &[Language::Sw]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let shared = Arc::new(SharedKnowledge::new(
            KnowledgeBase::builtin(&Language::ALL).unwrap(),
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let kb = shared.snapshot();
                        let languages = kb.index.languages().len();
                        // Either the full index or the Swahili-only one
                        assert!(languages == 3 || languages == 1);
                        assert_eq!(kb.index.stats().per_language.len(), languages);
                    }
                })
            })
            .collect();

        for _ in 0..5 {
            shared.replace(KnowledgeBase::builtin(&[Language::Sw]).unwrap());
            shared.replace(KnowledgeBase::builtin(&Language::ALL).unwrap());
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
