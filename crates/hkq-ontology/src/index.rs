//! Multilingual label index
//!
//! Maps (language, normalized surface text) to candidate entities. Built once
//! from a [`Schema`] and immutable afterwards; a reload builds a new index.
//!
//! Scoring bands, highest first:
//! - exact match in the requested language: 1.0
//! - prefix match in the requested language: 0.75 to 0.90
//! - substring match in the requested language: 0.55 to 0.70
//! - any match in another language: half the in-language score (at most 0.5)

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use hkq_core::{Candidate, EntityId, HkqError, Language, MatchKind, Result};

use crate::normalize::{char_len, normalize_label};
use crate::schema::{Labels, Schema, CLASS_MARKER, PROPERTY_MARKER};

/// Score of an exact in-language match
pub const EXACT_SCORE: f32 = 1.0;

const PREFIX_BASE: f32 = 0.75;
const SUBSTRING_BASE: f32 = 0.55;
const COVERAGE_WEIGHT: f32 = 0.15;

/// Multiplier applied to matches found through another language
pub const CROSS_LANGUAGE_FACTOR: f32 = 0.5;

/// Default minimum normalized length for prefix/substring matching
pub const DEFAULT_MIN_PARTIAL_LENGTH: usize = 3;

/// One indexed label
#[derive(Debug, Clone)]
struct LabelEntry {
    entity: EntityId,
    class: String,
    label: String,
    normalized: String,
    language: Language,
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    /// Distinct indexed entities (including schema terms)
    pub entities: usize,
    /// Total indexed labels
    pub labels: usize,
    /// Labels per language
    pub per_language: BTreeMap<Language, usize>,
    /// Entities without any label in a supported language
    pub missing: BTreeMap<Language, usize>,
}

/// Immutable label index over the schema's entities, classes and properties
#[derive(Debug, Clone)]
pub struct LabelIndex {
    languages: Vec<Language>,
    min_partial_length: usize,
    entries: Vec<LabelEntry>,
    /// (language, normalized label) → entry positions
    exact: HashMap<(Language, String), Vec<usize>>,
    /// language → (entry position, byte offset) of every label suffix,
    /// sorted by suffix text; offset 0 is the whole label
    suffixes: HashMap<Language, Vec<(usize, usize)>>,
    /// entity → preferred label per language
    preferred: HashMap<EntityId, BTreeMap<Language, String>>,
    stats: IndexStats,
}

impl LabelIndex {
    /// Build the index for the given languages
    pub fn build(schema: &Schema, languages: &[Language]) -> Self {
        Self::build_with(schema, languages, DEFAULT_MIN_PARTIAL_LENGTH)
    }

    /// Build with an explicit minimum length for partial matching
    pub fn build_with(schema: &Schema, languages: &[Language], min_partial_length: usize) -> Self {
        let mut languages = languages.to_vec();
        languages.sort();
        languages.dedup();

        let mut index = Self {
            languages,
            min_partial_length,
            entries: Vec::new(),
            exact: HashMap::new(),
            suffixes: HashMap::new(),
            preferred: HashMap::new(),
            stats: IndexStats::default(),
        };

        for entity in schema.entities() {
            if !entity.language_agnostic {
                index.record_coverage(&entity.id, &entity.labels);
            }
            index.add_labels(&entity.id, &entity.class, &entity.labels);
        }
        for class in schema.classes() {
            index.add_labels(&EntityId::new(&class.iri), CLASS_MARKER, &class.labels);
        }
        for property in schema.properties() {
            index.add_labels(&EntityId::new(&property.iri), PROPERTY_MARKER, &property.labels);
        }

        let entries = &index.entries;
        for suffixes in index.suffixes.values_mut() {
            suffixes.sort_by(|&(a, i), &(b, j)| {
                entries[a].normalized[i..].cmp(&entries[b].normalized[j..])
            });
        }

        index.stats.entities = index.preferred.len();
        index.stats.labels = index.entries.len();

        debug!(
            entities = index.stats.entities,
            labels = index.stats.labels,
            "Label index built"
        );
        index
    }

    fn record_coverage(&mut self, entity: &EntityId, labels: &Labels) {
        let missing: Vec<Language> = self
            .languages
            .iter()
            .copied()
            .filter(|l| !labels.contains_key(l))
            .collect();

        if !missing.is_empty() {
            let missing_codes: Vec<&str> = missing.iter().map(Language::code).collect();
            warn!(
                entity = %entity.local_name(),
                missing = ?missing_codes,
                "Entity has no label in some supported languages; cross-language fallback applies"
            );
            for language in missing {
                *self.stats.missing.entry(language).or_default() += 1;
            }
        }
    }

    fn add_labels(&mut self, entity: &EntityId, class: &str, labels: &Labels) {
        for (language, texts) in labels {
            if !self.languages.contains(language) {
                continue;
            }
            for text in texts {
                let normalized = normalize_label(text);
                if normalized.is_empty() {
                    continue;
                }

                let position = self.entries.len();
                self.entries.push(LabelEntry {
                    entity: entity.clone(),
                    class: class.to_string(),
                    label: text.clone(),
                    normalized: normalized.clone(),
                    language: *language,
                });
                self.exact
                    .entry((*language, normalized))
                    .or_default()
                    .push(position);
                let suffixes = self.suffixes.entry(*language).or_default();
                for (offset, _) in self.entries[position].normalized.char_indices() {
                    suffixes.push((position, offset));
                }
                self.preferred
                    .entry(entity.clone())
                    .or_default()
                    .entry(*language)
                    .or_insert_with(|| text.clone());
                *self.stats.per_language.entry(*language).or_default() += 1;
            }
        }
    }

    /// Supported languages, in a stable order
    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn supports(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Candidates for a surface text, best first.
    ///
    /// Each entity appears once with its best score. Ties are ordered
    /// in-language first, then by entity identifier.
    pub fn lookup(&self, language: Language, text: &str) -> Result<Vec<Candidate>> {
        if !self.supports(language) {
            return Err(HkqError::UnsupportedLanguage(language.code().to_string()));
        }

        let query = normalize_label(text);
        if query.is_empty() {
            return Err(HkqError::InvalidInput(format!(
                "'{text}' is empty after normalization"
            )));
        }

        let query_len = char_len(&query);
        let partial = query_len >= self.min_partial_length;
        let mut best: HashMap<&EntityId, Candidate> = HashMap::new();

        for &label_language in &self.languages {
            let cross_language = label_language != language;

            if let Some(positions) = self.exact.get(&(label_language, query.clone())) {
                for &position in positions {
                    self.offer(&mut best, position, MatchKind::Exact, EXACT_SCORE, cross_language);
                }
            }

            if !partial {
                continue;
            }
            for (position, offset) in self.suffix_range(label_language, &query) {
                let entry = &self.entries[position];
                if entry.normalized == query {
                    continue;
                }
                let coverage = query_len as f32 / char_len(&entry.normalized) as f32;
                if offset == 0 {
                    let score = PREFIX_BASE + COVERAGE_WEIGHT * coverage;
                    self.offer(&mut best, position, MatchKind::Prefix, score, cross_language);
                } else {
                    let score = SUBSTRING_BASE + COVERAGE_WEIGHT * coverage;
                    self.offer(&mut best, position, MatchKind::Substring, score, cross_language);
                }
            }
        }

        let mut candidates: Vec<Candidate> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.cross_language.cmp(&b.cross_language))
                .then_with(|| a.entity.cmp(&b.entity))
        });

        debug!(
            language = %language,
            query = %query,
            candidates = candidates.len(),
            "Label lookup"
        );
        Ok(candidates)
    }

    /// Label suffixes in `language` that start with `query`, found by binary
    /// search over the sorted suffix table
    fn suffix_range<'a>(
        &'a self,
        language: Language,
        query: &'a str,
    ) -> impl Iterator<Item = (usize, usize)> + 'a {
        let suffixes = self
            .suffixes
            .get(&language)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let suffix = |&(position, offset): &(usize, usize)| -> &'a str {
            &self.entries[position].normalized[offset..]
        };
        let start = suffixes.partition_point(|s| suffix(s) < query);
        suffixes[start..]
            .iter()
            .take_while(move |s| suffix(*s).starts_with(query))
            .copied()
    }

    fn offer<'a>(
        &'a self,
        best: &mut HashMap<&'a EntityId, Candidate>,
        position: usize,
        match_kind: MatchKind,
        score: f32,
        cross_language: bool,
    ) {
        let entry = &self.entries[position];
        let score = if cross_language {
            score * CROSS_LANGUAGE_FACTOR
        } else {
            score
        };

        let candidate = Candidate {
            entity: entry.entity.clone(),
            class: entry.class.clone(),
            label: entry.label.clone(),
            label_language: entry.language,
            match_kind,
            score,
            cross_language,
        };

        let keep_existing = best.get(&entry.entity).is_some_and(|existing| {
            existing.score > score || (existing.score == score && !existing.cross_language)
        });
        if !keep_existing {
            best.insert(&entry.entity, candidate);
        }
    }

    /// Display label of an entity in `language`, falling back to the other
    /// supported languages in order. Returns the label and its language.
    pub fn label_for(&self, entity: &EntityId, language: Language) -> Option<(&str, Language)> {
        let labels = self.preferred.get(entity)?;
        if let Some(label) = labels.get(&language) {
            return Some((label, language));
        }
        labels.iter().next().map(|(l, label)| (label.as_str(), *l))
    }
}
