//! Query compiler
//!
//! Fills a [`Template`] with per-slot [`Resolution`]s, type-checks every
//! pattern against the schema and renders a SPARQL 1.1 SELECT. Compilation is
//! deterministic: the same template and resolutions always give the same text.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use hkq_core::{
    Candidate, CompiledQuery, CompilerConfig, Datatype, EntityId, HkqError, Language, Literal,
    MatchKind, OutputVariable, Resolution, ResolvedValue, ValueKind,
};
use hkq_ontology::Schema;

use crate::template::{Comparison, Placeholder, Template};

const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Why a template could not be compiled
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Required slot '{slot}' could not be resolved")]
    UnresolvedRequiredSlot { slot: String },

    #[error("Required slot '{slot}' is ambiguous between {} candidates", .candidates.len())]
    AmbiguousRequiredSlot {
        slot: String,
        candidates: Vec<Candidate>,
    },

    #[error("Schema violation in template '{intent}': {detail}")]
    SchemaViolation { intent: String, detail: String },
}

impl From<CompileError> for HkqError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::SchemaViolation { intent, detail } => {
                HkqError::SchemaViolation { intent, detail }
            }
            other => HkqError::InvalidInput(other.to_string()),
        }
    }
}

/// A filter clause produced by a filled placeholder
#[derive(Debug, Clone, PartialEq)]
enum Filter {
    /// `?v = <iri>`
    Entity { variable: String, iri: String },
    /// `?v IN (<iri>, ...)`
    AnyOf { variable: String, iris: Vec<String> },
    /// `?v <op> literal`
    Literal {
        variable: String,
        comparison: Comparison,
        value: Literal,
    },
}

/// Compiles templates against one schema snapshot
#[derive(Debug, Clone)]
pub struct QueryCompiler<'a> {
    schema: &'a Schema,
    max_disjunction: usize,
    default_limit: usize,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a Schema, config: &CompilerConfig) -> Self {
        Self {
            schema,
            max_disjunction: config.max_disjunction.max(1),
            default_limit: config.default_limit,
        }
    }

    /// Compile a template with the resolutions of the request's slots, keyed
    /// by slot role. Slots without a resolution count as absent.
    pub fn compile(
        &self,
        template: &Template,
        resolutions: &BTreeMap<String, Resolution>,
    ) -> Result<CompiledQuery, CompileError> {
        // Required placeholders must be exactly resolved
        for placeholder in template.placeholders.iter().filter(|p| p.required) {
            match resolutions.get(&placeholder.slot) {
                Some(Resolution::Resolved(_)) => {}
                Some(Resolution::Ambiguous(candidates)) => {
                    return Err(CompileError::AmbiguousRequiredSlot {
                        slot: placeholder.slot.clone(),
                        candidates: candidates.clone(),
                    })
                }
                Some(Resolution::Unresolved) | None => {
                    return Err(CompileError::UnresolvedRequiredSlot {
                        slot: placeholder.slot.clone(),
                    })
                }
            }
        }

        // Classes actually bound to each entity variable
        let mut bound: HashMap<&str, Vec<String>> = HashMap::new();
        let mut filters = Vec::new();

        for placeholder in &template.placeholders {
            let Some(resolution) = resolutions.get(&placeholder.slot) else {
                continue;
            };
            if let Some((classes, filter)) = self.fill(template, placeholder, resolution)? {
                bound.insert(placeholder.variable.as_str(), classes);
                filters.push(filter);
            }
        }

        self.check_schema(template, &bound)?;

        let text = self.render(template, &filters);
        let output = template
            .variables
            .iter()
            .map(|v| OutputVariable {
                name: v.name.clone(),
                kind: v.kind.clone(),
                optional: template.is_optional(&v.name),
            })
            .collect();

        let query = CompiledQuery {
            intent: template.intent.clone(),
            text,
            subject: template.subject.clone(),
            output,
        };
        debug!(
            intent = %query.intent,
            filters = filters.len(),
            fingerprint = query.fingerprint(),
            "Compiled query"
        );
        Ok(query)
    }

    /// Turn one placeholder's resolution into a filter and the classes it binds
    fn fill(
        &self,
        template: &Template,
        placeholder: &Placeholder,
        resolution: &Resolution,
    ) -> Result<Option<(Vec<String>, Filter)>, CompileError> {
        let Some(variable) = template.variable(&placeholder.variable) else {
            return Err(violation(
                template,
                format!("slot '{}' targets an undeclared variable", placeholder.slot),
            ));
        };

        match (resolution, &variable.kind) {
            // Optional and unresolved: the clause is omitted
            (Resolution::Unresolved, _) => Ok(None),

            (Resolution::Resolved(ResolvedValue::Entity(candidate)), ValueKind::Entity { class }) => {
                self.require_member(template, placeholder, candidate, class)?;
                Ok(Some((
                    vec![candidate.class.clone()],
                    Filter::Entity {
                        variable: variable.name.clone(),
                        iri: candidate.entity.as_str().to_string(),
                    },
                )))
            }

            (Resolution::Ambiguous(candidates), ValueKind::Entity { class }) => {
                let top: Vec<&Candidate> = candidates.iter().take(self.max_disjunction).collect();
                if top.is_empty() {
                    return Ok(None);
                }
                for candidate in &top {
                    self.require_member(template, placeholder, candidate, class)?;
                }
                let mut classes: Vec<String> = top.iter().map(|c| c.class.clone()).collect();
                classes.sort();
                classes.dedup();
                Ok(Some((
                    classes,
                    Filter::AnyOf {
                        variable: variable.name.clone(),
                        iris: top.iter().map(|c| c.entity.as_str().to_string()).collect(),
                    },
                )))
            }

            (Resolution::Resolved(ResolvedValue::Literal(value)), ValueKind::Literal { datatype }) => {
                if !literal_fits(value.datatype(), *datatype) {
                    return Err(violation(
                        template,
                        format!(
                            "slot '{}' expects {datatype}, got {}",
                            placeholder.slot,
                            value.datatype()
                        ),
                    ));
                }
                Ok(Some((
                    Vec::new(),
                    Filter::Literal {
                        variable: variable.name.clone(),
                        comparison: placeholder.comparison,
                        value: value.clone(),
                    },
                )))
            }

            (_, ValueKind::Entity { class }) => Err(violation(
                template,
                format!(
                    "slot '{}' expects an entity of class '{class}', got a literal",
                    placeholder.slot
                ),
            )),

            (_, ValueKind::Literal { datatype }) => Err(violation(
                template,
                format!(
                    "slot '{}' expects a {datatype} literal, got an entity",
                    placeholder.slot
                ),
            )),
        }
    }

    fn require_member(
        &self,
        template: &Template,
        placeholder: &Placeholder,
        candidate: &Candidate,
        class: &str,
    ) -> Result<(), CompileError> {
        if self.schema.is_subclass_of(&candidate.class, class) {
            Ok(())
        } else {
            Err(violation(
                template,
                format!(
                    "slot '{}' bound '{}' of class '{}', expected '{class}'",
                    placeholder.slot,
                    candidate.entity.local_name(),
                    candidate.class
                ),
            ))
        }
    }

    /// Check every pattern against the schema's domain/range unions using the
    /// classes bound to its variables
    fn check_schema(
        &self,
        template: &Template,
        bound: &HashMap<&str, Vec<String>>,
    ) -> Result<(), CompileError> {
        let subject_class = template.subject_class();
        if self.schema.class(subject_class).is_none() {
            return Err(violation(
                template,
                format!("unknown subject class '{subject_class}'"),
            ));
        }

        for pattern in &template.patterns {
            let subjects = self.kinds_of(template, &pattern.subject, bound);
            let objects = self.kinds_of(template, &pattern.object, bound);

            for subject in &subjects {
                let ValueKind::Entity { class: subject_class } = subject else {
                    return Err(violation(
                        template,
                        format!("literal variable '{}' used as a subject", pattern.subject),
                    ));
                };
                for object in &objects {
                    self.schema
                        .check_triple(&pattern.property, subject_class, object)
                        .map_err(|detail| {
                            violation(
                                template,
                                format!(
                                    "?{} {} ?{}: {detail}",
                                    pattern.subject, pattern.property, pattern.object
                                ),
                            )
                        })?;
                }
            }
        }
        Ok(())
    }

    fn kinds_of(
        &self,
        template: &Template,
        variable: &str,
        bound: &HashMap<&str, Vec<String>>,
    ) -> Vec<ValueKind> {
        match (template.variable(variable).map(|v| &v.kind), bound.get(variable)) {
            (Some(ValueKind::Entity { .. }), Some(classes)) if !classes.is_empty() => classes
                .iter()
                .map(|class| ValueKind::Entity {
                    class: class.clone(),
                })
                .collect(),
            (Some(kind), _) => vec![kind.clone()],
            (None, _) => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    fn render(&self, template: &Template, filters: &[Filter]) -> String {
        let prefix = self.schema.prefix();
        let mut lines = vec![
            format!("PREFIX {prefix}: <{}>", self.schema.namespace()),
            format!("PREFIX rdf: <{RDF_NAMESPACE}>"),
            String::new(),
        ];

        let projection: Vec<String> = template
            .variables
            .iter()
            .map(|v| format!("?{}", v.name))
            .collect();
        lines.push(format!("SELECT DISTINCT {}", projection.join(" ")));
        lines.push("WHERE {".to_string());

        // Subject typing, widened to the subclasses of the subject class
        let subject = &template.subject;
        let classes = self.schema.subclasses(template.subject_class());
        if classes.len() <= 1 {
            lines.push(format!(
                "  ?{subject} rdf:type {} .",
                self.term(&self.schema.expand(template.subject_class()))
            ));
        } else {
            let types: Vec<String> = classes
                .iter()
                .map(|c| self.term(&self.schema.expand(c)))
                .collect();
            lines.push(format!("  ?{subject} rdf:type ?{subject}__class ."));
            lines.push(format!("  FILTER(?{subject}__class IN ({}))", types.join(", ")));
        }

        for pattern in &template.patterns {
            let triple = format!(
                "?{} {} ?{} .",
                pattern.subject,
                self.term(&self.schema.expand(&pattern.property)),
                pattern.object
            );
            if pattern.optional {
                lines.push(format!("  OPTIONAL {{ {triple} }}"));
            } else {
                lines.push(format!("  {triple}"));
            }
        }

        for filter in filters {
            lines.push(format!("  FILTER({})", self.render_filter(filter)));
        }
        lines.push("}".to_string());

        if let Some(order) = &template.order_by {
            if order.descending {
                lines.push(format!("ORDER BY DESC(?{})", order.variable));
            } else {
                lines.push(format!("ORDER BY ?{}", order.variable));
            }
        }
        lines.push(format!(
            "LIMIT {}",
            template.limit.unwrap_or(self.default_limit)
        ));

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    fn render_filter(&self, filter: &Filter) -> String {
        match filter {
            Filter::Entity { variable, iri } => format!("?{variable} = {}", self.term(iri)),
            Filter::AnyOf { variable, iris } => {
                let terms: Vec<String> = iris.iter().map(|iri| self.term(iri)).collect();
                format!("?{variable} IN ({})", terms.join(", "))
            }
            Filter::Literal {
                variable,
                comparison,
                value,
            } => match value {
                Literal::String(s) => format!(
                    "STR(?{variable}) {} \"{}\"",
                    comparison.operator(),
                    escape_string(s)
                ),
                other => format!("?{variable} {} {other}", comparison.operator()),
            },
        }
    }

    /// Prefixed name when the IRI is in the namespace, `<iri>` otherwise
    fn term(&self, iri: &str) -> String {
        match self.schema.compact(iri) {
            Some(local) if is_prefixed_local(local) => format!("{}:{local}", self.schema.prefix()),
            _ => format!("<{iri}>"),
        }
    }

    /// Compile the template with every placeholder bound to a stand-in of its
    /// declared type, and with only the required ones bound. Surfaces schema
    /// violations without a request.
    pub fn check(&self, template: &Template) -> Result<(), CompileError> {
        let mut all = BTreeMap::new();
        let mut required_only = BTreeMap::new();

        for placeholder in &template.placeholders {
            let Some(variable) = template.variable(&placeholder.variable) else {
                continue;
            };
            let resolution = Resolution::Resolved(match &variable.kind {
                ValueKind::Entity { class } => ResolvedValue::Entity(self.stand_in(class)),
                ValueKind::Literal { datatype } => ResolvedValue::Literal(sample_literal(*datatype)),
            });
            if placeholder.required {
                required_only.insert(placeholder.slot.clone(), resolution.clone());
            }
            all.insert(placeholder.slot.clone(), resolution);
        }

        self.compile(template, &required_only)?;
        self.compile(template, &all)?;
        Ok(())
    }

    fn stand_in(&self, class: &str) -> Candidate {
        Candidate {
            entity: EntityId::new(self.schema.expand(&format!("check_{class}"))),
            class: class.to_string(),
            label: class.to_string(),
            label_language: Language::En,
            match_kind: MatchKind::Exact,
            score: 1.0,
            cross_language: false,
        }
    }
}

fn violation(template: &Template, detail: String) -> CompileError {
    CompileError::SchemaViolation {
        intent: template.intent.clone(),
        detail,
    }
}

fn literal_fits(actual: Datatype, declared: Datatype) -> bool {
    actual == declared || (declared == Datatype::Decimal && actual == Datatype::Integer)
}

fn sample_literal(datatype: Datatype) -> Literal {
    match datatype {
        Datatype::String => Literal::String("check".to_string()),
        Datatype::Integer => Literal::Integer(0),
        Datatype::Decimal => Literal::Decimal(0.5),
        Datatype::Boolean => Literal::Boolean(true),
    }
}

fn is_prefixed_local(local: &str) -> bool {
    local
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}
