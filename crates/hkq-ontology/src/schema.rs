//! Ontology schema
//!
//! Classes, properties with domain/range unions, and the entities of the
//! static knowledge document. Loaded once from JSON and validated; the
//! resulting [`Schema`] is immutable.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use hkq_core::{Datatype, EntityId, HkqError, Language, Literal, Result, ValueKind};

/// Class marker used for schema classes in the label index
pub const CLASS_MARKER: &str = "rdfs:Class";

/// Class marker used for schema properties in the label index
pub const PROPERTY_MARKER: &str = "rdf:Property";

/// Labels keyed by language
pub type Labels = BTreeMap<Language, Vec<String>>;

// ============================================================================
// Document format
// ============================================================================

/// The ontology document as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyDocument {
    /// Namespace IRI that local identifiers expand into
    pub namespace: String,

    /// Prefix bound to the namespace in compiled queries
    pub prefix: String,

    #[serde(default)]
    pub classes: Vec<ClassDocument>,

    #[serde(default)]
    pub properties: Vec<PropertyDocument>,

    #[serde(default)]
    pub entities: Vec<EntityDocument>,
}

impl OntologyDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HkqError::InvalidOntology(format!("unreadable document: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDocument {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDocument {
    pub id: String,
    pub domain: Vec<String>,
    pub range: RangeDocument,
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeDocument {
    Classes { classes: Vec<String> },
    Datatype { datatype: Datatype },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDocument {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub language_agnostic: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: Vec<RelationDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDocument {
    pub property: String,
    pub target: String,
}

// ============================================================================
// Schema model
// ============================================================================

/// A schema class
#[derive(Debug, Clone, PartialEq)]
pub struct OntologyClass {
    pub id: String,
    pub iri: String,
    pub parent: Option<String>,
    pub labels: Labels,
}

/// Range of a schema property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyRange {
    /// Union of classes
    Classes(Vec<String>),
    /// Literal datatype
    Literal(Datatype),
}

/// A schema property
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaProperty {
    pub id: String,
    pub iri: String,
    /// Union of classes the property may apply to
    pub domain: Vec<String>,
    pub range: PropertyRange,
    pub labels: Labels,
}

/// An entity of the knowledge document
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub class: String,
    pub labels: Labels,
    pub language_agnostic: bool,
    pub attributes: BTreeMap<String, Literal>,
    pub relations: Vec<(String, EntityId)>,
}

/// Validated, immutable schema plus the entities it types
#[derive(Debug, Clone)]
pub struct Schema {
    namespace: String,
    prefix: String,
    classes: BTreeMap<String, OntologyClass>,
    properties: BTreeMap<String, SchemaProperty>,
    entities: BTreeMap<EntityId, EntityRecord>,
}

impl Schema {
    /// Parse and validate a JSON ontology document
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_document(OntologyDocument::from_json(json)?)
    }

    /// Validate a document and build the schema
    pub fn from_document(doc: OntologyDocument) -> Result<Self> {
        if doc.namespace.is_empty() || doc.prefix.is_empty() {
            return Err(invalid("namespace and prefix must be set"));
        }

        let mut schema = Self {
            namespace: doc.namespace,
            prefix: doc.prefix,
            classes: BTreeMap::new(),
            properties: BTreeMap::new(),
            entities: BTreeMap::new(),
        };

        // Classes
        for class in doc.classes {
            if schema.classes.contains_key(&class.id) {
                return Err(invalid(format!("duplicate class '{}'", class.id)));
            }
            let iri = schema.expand(&class.id);
            let labels = parse_labels(&class.id, class.labels);
            schema.classes.insert(
                class.id.clone(),
                OntologyClass {
                    id: class.id,
                    iri,
                    parent: class.parent,
                    labels,
                },
            );
        }
        schema.validate_hierarchy()?;

        // Properties
        for property in doc.properties {
            if schema.properties.contains_key(&property.id) {
                return Err(invalid(format!("duplicate property '{}'", property.id)));
            }
            if property.domain.is_empty() {
                return Err(invalid(format!(
                    "property '{}' has an empty domain",
                    property.id
                )));
            }
            for class in &property.domain {
                schema.require_class(class, &format!("domain of '{}'", property.id))?;
            }
            let range = match property.range {
                RangeDocument::Classes { classes } => {
                    if classes.is_empty() {
                        return Err(invalid(format!(
                            "property '{}' has an empty range",
                            property.id
                        )));
                    }
                    for class in &classes {
                        schema.require_class(class, &format!("range of '{}'", property.id))?;
                    }
                    PropertyRange::Classes(classes)
                }
                RangeDocument::Datatype { datatype } => PropertyRange::Literal(datatype),
            };
            let iri = schema.expand(&property.id);
            let labels = parse_labels(&property.id, property.labels);
            schema.properties.insert(
                property.id.clone(),
                SchemaProperty {
                    id: property.id,
                    iri,
                    domain: property.domain,
                    range,
                    labels,
                },
            );
        }

        // Entities, first pass: identity, class and labels
        let mut pending_relations = Vec::new();
        for entity in doc.entities {
            schema.require_class(&entity.class, &format!("class of entity '{}'", entity.id))?;

            let id = EntityId::new(schema.expand(&entity.id));
            if schema.entities.contains_key(&id) {
                return Err(invalid(format!("duplicate entity '{}'", entity.id)));
            }

            let labels = parse_labels(&entity.id, entity.labels);
            if labels.is_empty() && !entity.language_agnostic {
                return Err(invalid(format!(
                    "entity '{}' has no labels and is not language agnostic",
                    entity.id
                )));
            }

            let mut attributes = BTreeMap::new();
            for (property, value) in entity.attributes {
                let literal = schema.check_attribute(&entity.id, &entity.class, &property, value)?;
                attributes.insert(property, literal);
            }

            pending_relations.push((id.clone(), entity.relations));
            schema.entities.insert(
                id.clone(),
                EntityRecord {
                    id,
                    class: entity.class,
                    labels,
                    language_agnostic: entity.language_agnostic,
                    attributes,
                    relations: Vec::new(),
                },
            );
        }

        // Second pass: relations may point forward
        for (id, relations) in pending_relations {
            let mut resolved = Vec::with_capacity(relations.len());
            for relation in relations {
                let target = EntityId::new(schema.expand(&relation.target));
                schema.check_relation(&id, &relation.property, &target)?;
                resolved.push((relation.property, target));
            }
            if let Some(record) = schema.entities.get_mut(&id) {
                record.relations = resolved;
            }
        }

        Ok(schema)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn class(&self, id: &str) -> Option<&OntologyClass> {
        self.classes.get(id)
    }

    pub fn property(&self, id: &str) -> Option<&SchemaProperty> {
        self.properties.get(id)
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityRecord> {
        self.entities.get(id)
    }

    pub fn classes(&self) -> impl Iterator<Item = &OntologyClass> {
        self.classes.values()
    }

    pub fn properties(&self) -> impl Iterator<Item = &SchemaProperty> {
        self.properties.values()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Expand a local identifier into an IRI (absolute IRIs pass through)
    pub fn expand(&self, local: &str) -> String {
        if local.contains("://") {
            local.to_string()
        } else {
            format!("{}{}", self.namespace, local)
        }
    }

    /// Local part of an IRI inside the namespace
    pub fn compact<'a>(&self, iri: &'a str) -> Option<&'a str> {
        iri.strip_prefix(self.namespace.as_str())
            .filter(|local| !local.is_empty())
    }

    // ------------------------------------------------------------------
    // Class hierarchy
    // ------------------------------------------------------------------

    /// The class followed by its ancestors, nearest first
    pub fn ancestors<'a>(&'a self, class: &'a str) -> Vec<&'a str> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(parent) = self.classes.get(current).and_then(|c| c.parent.as_deref()) {
            // Hierarchy is acyclic after validation; the bound is a guard only
            if chain.len() > self.classes.len() {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Whether `class` equals `ancestor` or descends from it
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).contains(&ancestor)
    }

    /// Whether `class` is a member of a class union, subclass-aware
    pub fn class_in_union<S: AsRef<str>>(&self, class: &str, union: &[S]) -> bool {
        union.iter().any(|u| self.is_subclass_of(class, u.as_ref()))
    }

    /// The class and all its descendants, in id order
    pub fn subclasses(&self, class: &str) -> Vec<&str> {
        self.classes
            .keys()
            .map(String::as_str)
            .filter(|c| self.is_subclass_of(c, class))
            .collect()
    }

    // ------------------------------------------------------------------
    // Type checking
    // ------------------------------------------------------------------

    /// Check that `subject_class --property--> object` respects the
    /// property's domain and range. Returns a description of the mismatch.
    pub fn check_triple(
        &self,
        property: &str,
        subject_class: &str,
        object: &ValueKind,
    ) -> std::result::Result<(), String> {
        let Some(prop) = self.properties.get(property) else {
            return Err(format!("unknown property '{property}'"));
        };

        if !self.classes.contains_key(subject_class) {
            return Err(format!("unknown class '{subject_class}'"));
        }
        if !self.class_in_union(subject_class, prop.domain.as_slice()) {
            return Err(format!(
                "'{subject_class}' is not in the domain of '{property}' ({})",
                prop.domain.join(" | ")
            ));
        }

        match (&prop.range, object) {
            (PropertyRange::Classes(range), ValueKind::Entity { class }) => {
                if !self.classes.contains_key(class) {
                    return Err(format!("unknown class '{class}'"));
                }
                if !self.class_in_union(class, range.as_slice()) {
                    return Err(format!(
                        "'{class}' is not in the range of '{property}' ({})",
                        range.join(" | ")
                    ));
                }
                Ok(())
            }
            (PropertyRange::Literal(expected), ValueKind::Literal { datatype }) => {
                if datatype_compatible(*expected, *datatype) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{property}' expects {expected} values, got {datatype}"
                    ))
                }
            }
            (PropertyRange::Classes(range), ValueKind::Literal { datatype }) => Err(format!(
                "'{property}' ranges over classes ({}), got a {datatype} literal",
                range.join(" | ")
            )),
            (PropertyRange::Literal(expected), ValueKind::Entity { class }) => Err(format!(
                "'{property}' expects {expected} values, got an entity of class '{class}'"
            )),
        }
    }

    fn validate_hierarchy(&self) -> Result<()> {
        for class in self.classes.values() {
            let mut seen = HashSet::new();
            seen.insert(class.id.as_str());
            let mut current = class;
            while let Some(parent) = current.parent.as_deref() {
                let Some(next) = self.classes.get(parent) else {
                    return Err(invalid(format!(
                        "class '{}' has unknown parent '{parent}'",
                        current.id
                    )));
                };
                if !seen.insert(parent) {
                    return Err(invalid(format!(
                        "cyclic class hierarchy through '{}'",
                        class.id
                    )));
                }
                current = next;
            }
        }
        Ok(())
    }

    fn require_class(&self, class: &str, context: &str) -> Result<()> {
        if self.classes.contains_key(class) {
            Ok(())
        } else {
            Err(invalid(format!("unknown class '{class}' in {context}")))
        }
    }

    fn check_attribute(
        &self,
        entity: &str,
        class: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<Literal> {
        let Some(PropertyRange::Literal(datatype)) = self.properties.get(property).map(|p| &p.range)
        else {
            return Err(invalid(format!(
                "attribute '{property}' of entity '{entity}' is not a datatype property"
            )));
        };

        let literal = json_literal(&value, *datatype).ok_or_else(|| {
            invalid(format!(
                "attribute '{property}' of entity '{entity}' is not a valid {datatype}: {value}"
            ))
        })?;

        self.check_triple(
            property,
            class,
            &ValueKind::Literal {
                datatype: literal.datatype(),
            },
        )
        .map_err(|detail| invalid(format!("entity '{entity}': {detail}")))?;

        Ok(literal)
    }

    fn check_relation(&self, subject: &EntityId, property: &str, target: &EntityId) -> Result<()> {
        let subject_class = self
            .entities
            .get(subject)
            .map(|e| e.class.as_str())
            .unwrap_or_default();

        let Some(target_record) = self.entities.get(target) else {
            return Err(invalid(format!(
                "entity '{}' relates to unknown entity '{}'",
                subject.local_name(),
                target.local_name()
            )));
        };

        self.check_triple(
            property,
            subject_class,
            &ValueKind::Entity {
                class: target_record.class.clone(),
            },
        )
        .map_err(|detail| invalid(format!("entity '{}': {detail}", subject.local_name())))
    }
}

/// Integer values satisfy a decimal range
fn datatype_compatible(expected: Datatype, actual: Datatype) -> bool {
    expected == actual || (expected == Datatype::Decimal && actual == Datatype::Integer)
}

fn json_literal(value: &serde_json::Value, datatype: Datatype) -> Option<Literal> {
    use serde_json::Value;

    match (datatype, value) {
        (Datatype::Integer, Value::Number(n)) => n.as_i64().map(Literal::Integer),
        (Datatype::Decimal, Value::Number(n)) => n.as_f64().map(Literal::Decimal),
        (Datatype::Boolean, Value::Bool(b)) => Some(Literal::Boolean(*b)),
        (Datatype::String, Value::String(s)) => Some(Literal::String(s.clone())),
        (_, Value::String(s)) => datatype.parse(s),
        _ => None,
    }
}

fn parse_labels(owner: &str, raw: BTreeMap<String, Vec<String>>) -> Labels {
    let mut labels = Labels::new();
    for (tag, texts) in raw {
        let Ok(language) = tag.parse::<Language>() else {
            debug!(owner, language = %tag, "Skipping labels in unsupported language");
            continue;
        };
        // First label per language is the preferred one; keep document order
        let entry = labels.entry(language).or_default();
        for text in texts.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !entry.iter().any(|existing| existing == text) {
                entry.push(text.to_string());
            }
        }
    }
    labels.retain(|_, texts| !texts.is_empty());
    labels
}

fn invalid(message: impl Into<String>) -> HkqError {
    HkqError::InvalidOntology(message.into())
}
