//! HKQ Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development against a local Fuseki.

use crate::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Graph store (SPARQL endpoint) configuration
    pub store: StoreConfig,

    /// Ontology and template sources
    pub ontology: OntologyConfig,

    /// Entity resolution thresholds
    pub resolver: ResolverConfig,

    /// Query compilation limits
    pub compiler: CompilerConfig,

    /// Result normalization limits
    pub normalizer: NormalizerConfig,

    /// Binding-set cache
    pub cache: CacheConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Apply every variable `lookup` knows about onto this config
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_var("API_PORT", port)?;
        }

        // Store
        if let Some(url) = lookup("SPARQL_ENDPOINT") {
            self.store.endpoint = url;
        }
        if let Some(secs) = lookup("STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_var("STORE_TIMEOUT_SECS", secs)?;
        }
        if let Some(retries) = lookup("STORE_MAX_RETRIES") {
            self.store.max_retries = parse_var("STORE_MAX_RETRIES", retries)?;
        }
        if let Some(millis) = lookup("STORE_RETRY_BACKOFF_MS") {
            self.store.retry_backoff_ms = parse_var("STORE_RETRY_BACKOFF_MS", millis)?;
        }

        // Ontology
        if let Some(path) = lookup("ONTOLOGY_PATH") {
            self.ontology.path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("TEMPLATES_PATH") {
            self.ontology.templates_path = Some(PathBuf::from(path));
        }
        if let Some(languages) = lookup("SUPPORTED_LANGUAGES") {
            self.ontology.languages = parse_languages(&languages)?;
        }

        // Resolver
        if let Some(value) = lookup("RESOLVER_MIN_CONFIDENCE") {
            self.resolver.min_confidence = parse_var("RESOLVER_MIN_CONFIDENCE", value)?;
        }
        if let Some(value) = lookup("RESOLVER_AMBIGUITY_MARGIN") {
            self.resolver.ambiguity_margin = parse_var("RESOLVER_AMBIGUITY_MARGIN", value)?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.resolver.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "resolver.min_confidence".to_string(),
                value: self.resolver.min_confidence.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.resolver.ambiguity_margin) {
            return Err(ConfigError::InvalidValue {
                key: "resolver.ambiguity_margin".to_string(),
                value: self.resolver.ambiguity_margin.to_string(),
            });
        }
        if self.ontology.languages.is_empty() {
            return Err(ConfigError::MissingRequired(
                "ontology.languages".to_string(),
            ));
        }
        if self.compiler.max_disjunction == 0 {
            return Err(ConfigError::InvalidValue {
                key: "compiler.max_disjunction".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_languages(value: &str) -> Result<Vec<Language>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SUPPORTED_LANGUAGES".to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5055,
            request_timeout_secs: 30,
            cors_enabled: true,
            cors_origins: vec![],
        }
    }
}

/// SPARQL endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SPARQL 1.1 query endpoint
    pub endpoint: String,

    /// Timeout of a single HTTP attempt
    pub timeout_secs: u64,

    /// Retries after a transient failure (connection, timeout)
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3030/humanitarian/query".to_string(),
            timeout_secs: 10,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

/// Upper bound for one backoff delay between retries
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

impl StoreConfig {
    /// Timeout of a single attempt (at least one second)
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Delay before retry number `retry` (0-based): doubling, capped
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        Duration::from_millis(self.retry_backoff_ms)
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    /// Time an execution may take in total: every attempt timing out plus
    /// every backoff delay between them
    pub fn execution_budget(&self) -> Duration {
        let attempts = self.attempt_timeout().saturating_mul(self.max_retries.saturating_add(1));
        (0..self.max_retries).fold(attempts, |total, retry| {
            total.saturating_add(self.retry_delay(retry))
        })
    }
}

/// Ontology document and template catalog sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyConfig {
    /// Ontology JSON document; the bundled ontology is used when unset
    pub path: Option<PathBuf>,

    /// Template catalog TOML; the bundled catalog is used when unset
    pub templates_path: Option<PathBuf>,

    /// Languages indexed and accepted on requests
    pub languages: Vec<Language>,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            path: None,
            templates_path: None,
            languages: Language::ALL.to_vec(),
        }
    }
}

/// Entity resolution thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidates scoring below this are discarded
    pub min_confidence: f32,

    /// Candidates within this distance of the best score are ambiguous with it
    pub ambiguity_margin: f32,

    /// Shortest normalized text eligible for prefix/substring matching
    pub min_partial_length: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.45,
            ambiguity_margin: 0.05,
            min_partial_length: 3,
        }
    }
}

/// Query compilation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Top-K candidates kept in the disjunction of an ambiguous optional slot
    pub max_disjunction: usize,

    /// LIMIT used when a template declares none
    pub default_limit: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_disjunction: 5,
            default_limit: 100,
        }
    }
}

/// Result normalization limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Maximum facts returned; more are truncated
    pub max_rows: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { max_rows: 10 }
    }
}

/// Binding-set cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching of binding sets by compiled query
    pub enabled: bool,

    /// Maximum number of cached binding sets
    pub max_capacity: u64,

    /// Time-to-live in seconds
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 1_000,
            // The knowledge base changes through batch population only
            ttl_seconds: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl From<ConfigError> for crate::HkqError {
    fn from(err: ConfigError) -> Self {
        crate::HkqError::ConfigError(err.to_string())
    }
}
