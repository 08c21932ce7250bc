//! Entity resolution
//!
//! Turns one slot value into a [`Resolution`]: resolved, ambiguous or
//! unresolved. Pure function of the inputs and the knowledge snapshot.

use tracing::debug;

use hkq_core::{
    Candidate, Datatype, HkqError, Language, Resolution, ResolvedValue, ResolverConfig, Result,
};

use crate::KnowledgeBase;

/// Float slack when comparing score differences against the margin
const SCORE_EPSILON: f32 = 1e-6;

/// Resolves slot values against a knowledge snapshot
#[derive(Debug, Clone)]
pub struct EntityResolver {
    min_confidence: f32,
    ambiguity_margin: f32,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(&ResolverConfig::default())
    }
}

impl EntityResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            ambiguity_margin: config.ambiguity_margin,
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn ambiguity_margin(&self) -> f32 {
        self.ambiguity_margin
    }

    /// Resolve a surface text to an entity of `expected_class` (or any class
    /// when `None`).
    ///
    /// Fails only for an unsupported language; blank text is `Unresolved`.
    pub fn resolve(
        &self,
        knowledge: &KnowledgeBase,
        slot_role: &str,
        language: Language,
        text: &str,
        expected_class: Option<&str>,
    ) -> Result<Resolution> {
        let candidates = match knowledge.index.lookup(language, text) {
            Ok(candidates) => candidates,
            Err(HkqError::InvalidInput(_)) => {
                debug!(slot = slot_role, "Blank slot text");
                return Ok(Resolution::Unresolved);
            }
            Err(e) => return Err(e),
        };

        let eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| match expected_class {
                Some(class) => knowledge.schema.is_subclass_of(&c.class, class),
                None => true,
            })
            .filter(|c| c.score >= self.min_confidence)
            .collect();

        let resolution = self.decide(eligible);
        debug!(
            slot = slot_role,
            language = %language,
            text,
            expected_class = expected_class.unwrap_or("*"),
            outcome = outcome_name(&resolution),
            "Resolved slot"
        );
        Ok(resolution)
    }

    /// Pick the outcome from eligible candidates sorted best first
    fn decide(&self, eligible: Vec<Candidate>) -> Resolution {
        let Some(top) = eligible.first() else {
            return Resolution::Unresolved;
        };
        let top_score = top.score;
        let top_in_language = !top.cross_language;

        let mut contenders: Vec<Candidate> = eligible
            .into_iter()
            .take_while(|c| top_score - c.score <= self.ambiguity_margin + SCORE_EPSILON)
            .collect();

        // An in-language leader beats cross-language fallbacks it is tied with
        if top_in_language {
            contenders.retain(|c| !c.cross_language);
        }

        if contenders.len() == 1 {
            let winner = contenders.remove(0);
            Resolution::Resolved(ResolvedValue::Entity(winner))
        } else {
            Resolution::Ambiguous(contenders)
        }
    }

    /// Resolve a literal slot by typed parsing
    pub fn resolve_literal(&self, slot_role: &str, text: &str, datatype: Datatype) -> Resolution {
        match datatype.parse(text) {
            Some(literal) => Resolution::Resolved(ResolvedValue::Literal(literal)),
            None => {
                debug!(slot = slot_role, text, %datatype, "Slot text is not a valid literal");
                Resolution::Unresolved
            }
        }
    }
}

fn outcome_name(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::Resolved(_) => "resolved",
        Resolution::Ambiguous(_) => "ambiguous",
        Resolution::Unresolved => "unresolved",
    }
}
