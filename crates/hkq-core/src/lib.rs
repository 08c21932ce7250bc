//! HKQ Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the HKQ system:
//! - Languages, entity identifiers and literal values
//! - Slot resolution results (resolved / ambiguous / unresolved)
//! - Compiled queries and the binding sets returned by a store
//! - Normalized, language-tagged facts handed to response generation
//! - Common error types
//! - The query executor trait implemented by store backends
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, CacheConfig, CompilerConfig, ConfigError, LoggingConfig, NormalizerConfig,
    OntologyConfig, ResolverConfig, ServerConfig, StoreConfig, MAX_RETRY_DELAY,
};

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for HKQ operations
#[derive(Error, Debug)]
pub enum HkqError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid ontology: {0}")]
    InvalidOntology(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Schema violation in template '{intent}': {detail}")]
    SchemaViolation { intent: String, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HkqError>;

/// Failures reported by the query execution collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Store rejected query as malformed: {0}")]
    MalformedQuery(String),

    #[error("Store returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

// ============================================================================
// Languages
// ============================================================================

/// Languages the label index and responses support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Swahili (including the Congolese variety)
    Sw,
    /// French
    Fr,
    /// English
    En,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Sw, Language::Fr, Language::En];

    /// ISO 639-1 code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sw => "sw",
            Self::Fr => "fr",
            Self::En => "en",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Language {
    type Err = HkqError;

    /// Accepts ISO 639-1/639-3 codes and BCP-47 tags with a region (`sw-CD`)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let primary = s
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match primary.as_str() {
            "sw" | "swa" | "swc" | "swh" => Ok(Self::Sw),
            "fr" | "fra" | "fre" => Ok(Self::Fr),
            "en" | "eng" => Ok(Self::En),
            _ => Err(HkqError::UnsupportedLanguage(s.to_string())),
        }
    }
}

// ============================================================================
// Identifiers and Literals
// ============================================================================

/// Stable identifier (IRI) of an entity, class or property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fragment or last path segment of the IRI
    pub fn local_name(&self) -> &str {
        self.0
            .rsplit(['#', '/'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Literal datatypes supported by schema ranges and template placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    String,
    Integer,
    Decimal,
    Boolean,
}

impl Datatype {
    /// XML Schema datatype IRI
    pub fn xsd_iri(&self) -> &'static str {
        match self {
            Self::String => "http://www.w3.org/2001/XMLSchema#string",
            Self::Integer => "http://www.w3.org/2001/XMLSchema#integer",
            Self::Decimal => "http://www.w3.org/2001/XMLSchema#decimal",
            Self::Boolean => "http://www.w3.org/2001/XMLSchema#boolean",
        }
    }

    /// Parse raw text as a value of this datatype
    pub fn parse(&self, text: &str) -> Option<Literal> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match self {
            Self::String => Some(Literal::String(text.to_string())),
            // Thousands separators are common in spoken figures ("5,000", "5 000")
            Self::Integer => strip_digit_groups(text)?
                .parse()
                .ok()
                .map(Literal::Integer),
            Self::Decimal => text
                .replace([' ', '_'], "")
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .map(Literal::Decimal),
            Self::Boolean => match text.to_lowercase().as_str() {
                "true" | "yes" | "ndiyo" | "oui" | "1" => Some(Literal::Boolean(true)),
                "false" | "no" | "hapana" | "non" | "0" => Some(Literal::Boolean(false)),
                _ => None,
            },
        }
    }
}

/// Remove thousands separators, accepting only well-formed groups: a leading
/// group of 1-3 digits, then groups of exactly 3 ("12,500" but not "1,5")
fn strip_digit_groups(text: &str) -> Option<String> {
    let groups: Vec<&str> = text.split([',', ' ', '_']).collect();
    let (first, rest) = groups.split_first()?;
    if rest.is_empty() {
        return Some(text.to_string());
    }

    let lead = first.trim_start_matches(['-', '+']);
    let well_formed = (1..=3).contains(&lead.len())
        && rest
            .iter()
            .all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()));
    well_formed.then(|| groups.concat())
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Decimal => write!(f, "decimal"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// A typed literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "value", rename_all = "lowercase")]
pub enum Literal {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

impl Literal {
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::String(_) => Datatype::String,
            Self::Integer(_) => Datatype::Integer,
            Self::Decimal(_) => Datatype::Decimal,
            Self::Boolean(_) => Datatype::Boolean,
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

// ============================================================================
// Requests and Resolution
// ============================================================================

/// One extracted slot of a request, produced upstream by the NLU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValue {
    /// Slot role (e.g. "location", "service_type")
    pub role: String,

    /// Raw surface text as extracted
    pub text: String,
}

impl SlotValue {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            text: text.into(),
        }
    }
}

/// A structured request: recognized intent, language and slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub intent: String,
    pub language: Language,
    #[serde(default)]
    pub slots: Vec<SlotValue>,
}

impl QueryRequest {
    pub fn new(intent: impl Into<String>, language: Language) -> Self {
        Self {
            intent: intent.into(),
            language,
            slots: Vec::new(),
        }
    }

    /// Add a slot value
    pub fn with_slot(mut self, role: impl Into<String>, text: impl Into<String>) -> Self {
        self.slots.push(SlotValue::new(role, text));
        self
    }
}

/// How a surface text matched a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix,
    Substring,
}

/// An entity proposed by the label index for a surface text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Entity identifier
    pub entity: EntityId,

    /// Ontology class of the entity
    pub class: String,

    /// The label that matched (original casing)
    pub label: String,

    /// Language of the matched label
    pub label_language: Language,

    /// Kind of match
    pub match_kind: MatchKind,

    /// Match confidence (0.0 - 1.0)
    pub score: f32,

    /// True when the label matched in a language other than the requested one
    pub cross_language: bool,
}

/// A resolved slot value: an entity or a typed literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    Entity(Candidate),
    Literal(Literal),
}

/// Outcome of resolving one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    /// Exactly one value
    Resolved(ResolvedValue),

    /// Several candidates within the ambiguity margin, best first (never empty)
    Ambiguous(Vec<Candidate>),

    /// Nothing above the confidence threshold
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

// ============================================================================
// Compiled Queries
// ============================================================================

/// Expected shape of an output variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    Entity { class: String },
    Literal { datatype: Datatype },
}

/// An output variable declared by a compiled query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputVariable {
    /// Variable name without the leading `?`
    pub name: String,

    pub kind: ValueKind,

    /// Bound only through an OPTIONAL pattern
    pub optional: bool,
}

/// An executable query and the metadata needed to read its bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    /// Canonical intent of the template it was compiled from
    pub intent: String,

    /// SPARQL text
    pub text: String,

    /// Variable holding the subject of the template
    pub subject: String,

    /// Declared output variables, in projection order
    pub output: Vec<OutputVariable>,
}

impl CompiledQuery {
    /// Stable hash of the query text, used for logging and cache keys
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.text.hash(&mut hasher);
        hasher.finish()
    }

    pub fn output_variable(&self, name: &str) -> Option<&OutputVariable> {
        self.output.iter().find(|v| v.name == name)
    }
}

// ============================================================================
// Binding Sets
// ============================================================================

/// A value bound to a variable in a result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BindingValue {
    Iri {
        value: String,
    },
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Blank {
        value: String,
    },
}

impl BindingValue {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: Datatype) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: Some(datatype.xsd_iri().to_string()),
            language: None,
        }
    }

    /// Lexical value regardless of kind
    pub fn lexical(&self) -> &str {
        match self {
            Self::Iri { value } | Self::Literal { value, .. } | Self::Blank { value } => value,
        }
    }
}

/// One result row: variable name → value
pub type BindingRow = BTreeMap<String, BindingValue>;

/// Ordered rows returned by the store for a compiled query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSet {
    /// Projected variables as reported by the store
    pub variables: Vec<String>,

    /// Rows in store order
    pub rows: Vec<BindingRow>,
}

impl BindingSet {
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            variables,
            rows: Vec::new(),
        }
    }

    /// Append a row built from (variable, value) pairs
    pub fn with_row<I, K>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = (K, BindingValue)>,
        K: Into<String>,
    {
        self.rows
            .push(row.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

// ============================================================================
// Normalized Results
// ============================================================================

/// A single normalized value of a fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactValue {
    Entity {
        id: EntityId,
        label: String,
        /// Language of the label, `None` when derived from the identifier
        language: Option<Language>,
    },
    Literal {
        value: Literal,
    },
}

impl FactValue {
    /// Text shown to the user
    pub fn display(&self) -> String {
        match self {
            Self::Entity { label, .. } => label.clone(),
            Self::Literal { value } => value.to_string(),
        }
    }
}

/// One structured fact: output variable → value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fact {
    values: BTreeMap<String, FactValue>,
}

impl Fact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: impl Into<String>, value: FactValue) {
        self.values.insert(variable.into(), value);
    }

    pub fn get(&self, variable: &str) -> Option<&FactValue> {
        self.values.get(variable)
    }

    /// Displayed text of a variable, if bound
    pub fn display(&self, variable: &str) -> Option<String> {
        self.values.get(variable).map(FactValue::display)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result handed to downstream response generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NormalizedResult {
    /// Facts in first-seen order, capped at the configured maximum
    Facts { rows: Vec<Fact>, truncated: bool },

    /// The query was valid but matched nothing
    NoResults,

    /// A slot matched several entities; the user must pick one
    Clarification {
        slot: String,
        candidates: Vec<Candidate>,
    },

    /// A required slot could not be resolved
    MissingSlot { slot: String },
}

// ============================================================================
// Traits
// ============================================================================

/// Executes compiled queries against a graph store
///
/// Implementations own transport concerns (connection, retries with
/// backoff); the pipeline only sees the final outcome.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a compiled query and return its bindings
    async fn execute(&self, query: &CompiledQuery) -> std::result::Result<BindingSet, StoreError>;

    /// Get executor name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!("sw".parse::<Language>().unwrap(), Language::Sw);
        assert_eq!("swc".parse::<Language>().unwrap(), Language::Sw);
        assert_eq!("fr-CD".parse::<Language>().unwrap(), Language::Fr);
        assert_eq!("EN_us".parse::<Language>().unwrap(), Language::En);
        assert!(matches!(
            "ln".parse::<Language>(),
            Err(HkqError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_entity_id_local_name() {
        let id = EntityId::new("http://example.org/humanitarian#location_goma");
        assert_eq!(id.local_name(), "location_goma");

        let id = EntityId::new("http://example.org/resource/camp_1");
        assert_eq!(id.local_name(), "camp_1");

        let id = EntityId::new("plain");
        assert_eq!(id.local_name(), "plain");
    }

    #[test]
    fn test_datatype_parse() {
        assert_eq!(
            Datatype::Integer.parse("5,000"),
            Some(Literal::Integer(5000))
        );
        assert_eq!(Datatype::Integer.parse("elfu"), None);
        assert_eq!(
            Datatype::Integer.parse("12 500"),
            Some(Literal::Integer(12500))
        );
        assert_eq!(
            Datatype::Integer.parse("1,250,000"),
            Some(Literal::Integer(1_250_000))
        );
        assert_eq!(Datatype::Integer.parse("1,5"), None);
        assert_eq!(Datatype::Integer.parse("5,0000"), None);
        assert_eq!(Datatype::Integer.parse("1234,000"), None);
        assert_eq!(Datatype::Decimal.parse("2,5"), Some(Literal::Decimal(2.5)));
        assert_eq!(Datatype::Decimal.parse("NaN"), None);
        assert_eq!(
            Datatype::Boolean.parse("Ndiyo"),
            Some(Literal::Boolean(true))
        );
        assert_eq!(Datatype::String.parse("   "), None);
    }

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::Connection("refused".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::MalformedQuery("parse error".into()).is_transient());
    }

    #[test]
    fn test_normalized_result_serialization() {
        let mut fact = Fact::new();
        fact.insert(
            "facility",
            FactValue::Entity {
                id: EntityId::new("http://example.org/humanitarian#clinic_goma"),
                label: "clinic_goma".to_string(),
                language: None,
            },
        );
        fact.insert(
            "capacity",
            FactValue::Literal {
                value: Literal::Integer(120),
            },
        );

        let result = NormalizedResult::Facts {
            rows: vec![fact],
            truncated: false,
        };
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["outcome"], "facts");
        assert_eq!(json["rows"][0]["facility"]["label"], "clinic_goma");
        assert_eq!(json["rows"][0]["capacity"]["value"]["value"], 120);
        assert_eq!(json["truncated"], false);
    }

    #[test]
    fn test_resolution_serialization() {
        let json = serde_json::to_value(Resolution::Unresolved).unwrap();
        assert_eq!(json["status"], "unresolved");

        let json = serde_json::to_value(Resolution::Resolved(ResolvedValue::Literal(
            Literal::Integer(5000),
        )))
        .unwrap();
        assert_eq!(json["status"], "resolved");
        assert_eq!(json["value"]["kind"], "literal");
    }

    #[test]
    fn test_binding_set_builder() {
        let bindings = BindingSet::new(vec!["facility".to_string()])
            .with_row([("facility", BindingValue::iri("http://x#a"))])
            .with_row([("facility", BindingValue::iri("http://x#b"))]);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.rows[1]["facility"].lexical(), "http://x#b");
    }

    #[test]
    fn test_compiled_query_fingerprint_is_stable() {
        let query = CompiledQuery {
            intent: "query_camps".to_string(),
            text: "SELECT ?camp WHERE { ?camp ?p ?o . }".to_string(),
            subject: "camp".to_string(),
            output: vec![],
        };
        assert_eq!(query.fingerprint(), query.clone().fingerprint());
    }

    struct EmptyExecutor;

    #[async_trait::async_trait]
    impl QueryExecutor for EmptyExecutor {
        async fn execute(
            &self,
            query: &CompiledQuery,
        ) -> std::result::Result<BindingSet, StoreError> {
            Ok(BindingSet::new(
                query.output.iter().map(|v| v.name.clone()).collect(),
            ))
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    #[test]
    fn test_executor_as_trait_object() {
        let executor: Box<dyn QueryExecutor> = Box::new(EmptyExecutor);
        let query = CompiledQuery {
            intent: "query_camps".to_string(),
            text: "SELECT ?camp WHERE { ?camp ?p ?o . }".to_string(),
            subject: "camp".to_string(),
            output: vec![OutputVariable {
                name: "camp".to_string(),
                kind: ValueKind::Entity {
                    class: "Camp".to_string(),
                },
                optional: false,
            }],
        };

        let bindings = tokio_test::block_on(executor.execute(&query)).unwrap();
        assert!(bindings.is_empty());
        assert_eq!(bindings.variables, vec!["camp".to_string()]);
        assert_eq!(executor.name(), "empty");
    }
}
