//! Query template registry
//!
//! Templates are data: each maps an intent to a graph pattern over typed
//! variables, plus the placeholders that slots fill. Adding an intent means
//! adding a `[[template]]` entry to the catalog.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use hkq_core::{AppConfig, Datatype, HkqError, Language, Result, ValueKind};

/// The template catalog bundled with the crate
pub const BUILTIN_TEMPLATES: &str = include_str!("../data/templates.toml");

// ============================================================================
// Catalog format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(rename = "template", default)]
    templates: Vec<TemplateDocument>,
}

#[derive(Debug, Deserialize)]
struct TemplateDocument {
    intent: String,
    #[serde(default)]
    aliases: Vec<String>,
    subject: String,
    variables: Vec<VariableDocument>,
    #[serde(default)]
    patterns: Vec<TriplePattern>,
    #[serde(default)]
    placeholders: Vec<Placeholder>,
    #[serde(default)]
    order_by: Option<OrderBy>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    messages: BTreeMap<Language, TemplateMessages>,
}

#[derive(Debug, Deserialize)]
struct VariableDocument {
    name: String,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    datatype: Option<Datatype>,
}

// ============================================================================
// Template model
// ============================================================================

/// A typed query variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub kind: ValueKind,
}

/// `?subject property ?object`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: String,
    pub property: String,
    pub object: String,
    /// Rendered inside OPTIONAL { }
    #[serde(default)]
    pub optional: bool,
}

/// Comparison used when a literal placeholder is filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// A slot that constrains a variable when the request provides it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Slot role that fills this placeholder
    pub slot: String,
    /// Variable the filter applies to
    pub variable: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub comparison: Comparison,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub variable: String,
    #[serde(default)]
    pub descending: bool,
}

/// Per-language response messages; `{slot}` is substituted where relevant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMessages {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub empty: Option<String>,
    #[serde(default)]
    pub clarify: Option<String>,
    #[serde(default)]
    pub missing: Option<String>,
}

/// A validated query template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    /// Canonical intent name
    pub intent: String,
    pub aliases: Vec<String>,
    /// Variable bound to the instances the intent asks about
    pub subject: String,
    /// Projected variables, in output order
    pub variables: Vec<Variable>,
    pub patterns: Vec<TriplePattern>,
    pub placeholders: Vec<Placeholder>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub messages: BTreeMap<Language, TemplateMessages>,
}

impl Template {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Class of the subject variable
    pub fn subject_class(&self) -> &str {
        match self.variable(&self.subject).map(|v| &v.kind) {
            Some(ValueKind::Entity { class }) => class,
            _ => "",
        }
    }

    pub fn placeholder_for_slot(&self, slot: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.slot == slot)
    }

    /// Expected kind of the value filling a slot
    pub fn slot_kind(&self, slot: &str) -> Option<&ValueKind> {
        let placeholder = self.placeholder_for_slot(slot)?;
        self.variable(&placeholder.variable).map(|v| &v.kind)
    }

    /// A variable is optional when it is bound only through OPTIONAL patterns
    pub fn is_optional(&self, variable: &str) -> bool {
        if variable == self.subject {
            return false;
        }
        self.patterns
            .iter()
            .filter(|p| p.subject == variable || p.object == variable)
            .all(|p| p.optional)
    }

    pub fn messages(&self, language: Language) -> Option<&TemplateMessages> {
        self.messages.get(&language)
    }

    fn from_document(doc: TemplateDocument) -> Result<Self> {
        let intent = doc.intent.trim().to_string();
        if intent.is_empty() {
            return Err(invalid("template without an intent"));
        }
        let context = |detail: String| invalid(format!("template '{intent}': {detail}"));

        let mut variables = Vec::with_capacity(doc.variables.len());
        let mut names = HashSet::new();
        for variable in doc.variables {
            if !is_variable_name(&variable.name) {
                return Err(context(format!("invalid variable name '{}'", variable.name)));
            }
            if !names.insert(variable.name.clone()) {
                return Err(context(format!("duplicate variable '{}'", variable.name)));
            }
            let kind = match (variable.class, variable.datatype) {
                (Some(class), None) => ValueKind::Entity { class },
                (None, Some(datatype)) => ValueKind::Literal { datatype },
                _ => {
                    return Err(context(format!(
                        "variable '{}' needs exactly one of class or datatype",
                        variable.name
                    )))
                }
            };
            variables.push(Variable {
                name: variable.name,
                kind,
            });
        }

        let template = Self {
            intent: intent.clone(),
            aliases: doc.aliases,
            subject: doc.subject,
            variables,
            patterns: doc.patterns,
            placeholders: doc.placeholders,
            order_by: doc.order_by,
            limit: doc.limit,
            messages: doc.messages,
        };

        match template.variable(&template.subject).map(|v| &v.kind) {
            Some(ValueKind::Entity { .. }) => {}
            Some(ValueKind::Literal { .. }) => {
                return Err(context("subject must be an entity variable".to_string()))
            }
            None => {
                return Err(context(format!(
                    "subject '{}' is not a declared variable",
                    template.subject
                )))
            }
        }

        for pattern in &template.patterns {
            for name in [&pattern.subject, &pattern.object] {
                if template.variable(name).is_none() {
                    return Err(context(format!("pattern uses undeclared variable '{name}'")));
                }
            }
            if let Some(ValueKind::Literal { .. }) =
                template.variable(&pattern.subject).map(|v| &v.kind)
            {
                return Err(context(format!(
                    "literal variable '{}' cannot be a pattern subject",
                    pattern.subject
                )));
            }
        }

        for variable in &template.variables {
            let bound = variable.name == template.subject
                || template
                    .patterns
                    .iter()
                    .any(|p| p.subject == variable.name || p.object == variable.name);
            if !bound {
                return Err(context(format!(
                    "variable '{}' is not bound by any pattern",
                    variable.name
                )));
            }
        }

        let mut slots = HashSet::new();
        for placeholder in &template.placeholders {
            if !slots.insert(placeholder.slot.as_str()) {
                return Err(context(format!("duplicate slot '{}'", placeholder.slot)));
            }
            match template.variable(&placeholder.variable).map(|v| &v.kind) {
                None => {
                    return Err(context(format!(
                        "slot '{}' targets undeclared variable '{}'",
                        placeholder.slot, placeholder.variable
                    )))
                }
                Some(ValueKind::Entity { .. }) if placeholder.comparison != Comparison::Eq => {
                    return Err(context(format!(
                        "entity slot '{}' only supports equality",
                        placeholder.slot
                    )))
                }
                Some(_) => {}
            }
        }

        if let Some(order) = &template.order_by {
            if template.variable(&order.variable).is_none() {
                return Err(context(format!(
                    "order_by uses undeclared variable '{}'",
                    order.variable
                )));
            }
        }
        if template.limit == Some(0) {
            return Err(context("limit must be positive".to_string()));
        }

        Ok(template)
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(message: impl Into<String>) -> HkqError {
    HkqError::InvalidTemplate(message.into())
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable intent → template catalog
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
    /// Intent names and aliases → position in `templates`
    by_intent: HashMap<String, usize>,
}

impl TemplateRegistry {
    /// Parse and validate a TOML catalog
    pub fn from_toml(toml_text: &str) -> Result<Self> {
        let catalog: CatalogDocument = toml::from_str(toml_text)
            .map_err(|e| invalid(format!("unreadable template catalog: {e}")))?;

        let mut registry = Self {
            templates: Vec::with_capacity(catalog.templates.len()),
            by_intent: HashMap::new(),
        };

        for doc in catalog.templates {
            let template = Template::from_document(doc)?;
            let position = registry.templates.len();
            for name in std::iter::once(&template.intent).chain(&template.aliases) {
                if registry.by_intent.insert(name.clone(), position).is_some() {
                    return Err(invalid(format!("intent '{name}' is declared twice")));
                }
            }
            registry.templates.push(template);
        }

        Ok(registry)
    }

    /// The bundled catalog
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_TEMPLATES)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        let registry = Self::from_toml(&text)?;
        info!(path = %path.display(), templates = registry.len(), "Template catalog loaded");
        Ok(registry)
    }

    /// Load the configured catalog, or the bundled one when no path is set
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        match &config.ontology.templates_path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    /// Template for an intent name or alias
    pub fn template_for(&self, intent: &str) -> Result<&Template> {
        self.by_intent
            .get(intent.trim())
            .map(|&position| &self.templates[position])
            .ok_or_else(|| HkqError::UnknownIntent(intent.to_string()))
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
        [[template]]
        intent = "query_water_sources"
        aliases = ["query_water_sources_swa"]
        subject = "source"
        variables = [
            { name = "source", class = "WaterSource" },
            { name = "location", class = "Location" },
            { name = "status", datatype = "string" },
        ]
        patterns = [
            { subject = "source", property = "hasLocation", object = "location" },
            { subject = "source", property = "hasStatus", object = "status", optional = true },
        ]
        placeholders = [
            { slot = "location", variable = "location" },
            { slot = "status", variable = "status" },
        ]

        [template.messages.sw]
        header = "Vyanzo vya maji:"
    "#;

    #[test]
    fn test_load_catalog() {
        let registry = TemplateRegistry::from_toml(CATALOG).unwrap();
        assert_eq!(registry.len(), 1);

        let template = registry.template_for("query_water_sources").unwrap();
        assert_eq!(template.subject_class(), "WaterSource");
        assert_eq!(template.variables.len(), 3);
        assert!(template.is_optional("status"));
        assert!(!template.is_optional("location"));
        assert_eq!(
            template.messages(Language::Sw).unwrap().header.as_deref(),
            Some("Vyanzo vya maji:")
        );
        assert_eq!(
            template.slot_kind("status"),
            Some(&ValueKind::Literal {
                datatype: Datatype::String
            })
        );
    }

    #[test]
    fn test_aliases_resolve_to_same_template() {
        let registry = TemplateRegistry::from_toml(CATALOG).unwrap();
        let canonical = registry.template_for("query_water_sources").unwrap();
        let alias = registry.template_for("query_water_sources_swa").unwrap();
        assert_eq!(canonical, alias);
    }

    #[test]
    fn test_unknown_intent() {
        let registry = TemplateRegistry::from_toml(CATALOG).unwrap();
        assert!(matches!(
            registry.template_for("book_flight"),
            Err(HkqError::UnknownIntent(_))
        ));
    }

    #[test]
    fn test_rejects_undeclared_variable() {
        let catalog = CATALOG.replace(
            r#"object = "location" }"#,
            r#"object = "place" }"#,
        );
        assert!(matches!(
            TemplateRegistry::from_toml(&catalog),
            Err(HkqError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_intent() {
        let catalog = format!("{CATALOG}\n{}", CATALOG.replace("[template.messages.sw]", "[template.messages.fr]"));
        let err = TemplateRegistry::from_toml(&catalog).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_rejects_entity_comparison() {
        let catalog = CATALOG.replace(
            r#"{ slot = "location", variable = "location" }"#,
            r#"{ slot = "location", variable = "location", comparison = "gte" }"#,
        );
        assert!(TemplateRegistry::from_toml(&catalog).is_err());
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let registry = TemplateRegistry::builtin().unwrap();

        for intent in [
            "query_health_facilities",
            "query_water_sources",
            "query_camps",
            "submit_aid_request",
            "query_camps_by_coordinator",
            "query_treatment",
            "query_camp_status",
            "query_health_facilities_swa",
        ] {
            assert!(registry.template_for(intent).is_ok(), "missing {intent}");
        }
    }
}
