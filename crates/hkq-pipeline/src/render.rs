//! Response rendering
//!
//! Turns a [`NormalizedResult`] into reply text using the per-language
//! messages declared on the template, with generic messages as fallback.

use hkq_core::{FactValue, Language, NormalizedResult, ValueKind};
use hkq_query::{Template, TemplateMessages};

struct Generic {
    header: &'static str,
    empty: &'static str,
    clarify: &'static str,
    missing: &'static str,
    more: &'static str,
}

fn generic(language: Language) -> Generic {
    match language {
        Language::Sw => Generic {
            header: "Majibu yaliyopatikana:",
            empty: "Samahani, hakuna majibu yaliyopatikana.",
            clarify: "Tafadhali chagua moja:",
            missing: "Tafadhali toa taarifa kuhusu {slot}.",
            more: "(na mengineyo)",
        },
        Language::Fr => Generic {
            header: "Résultats trouvés :",
            empty: "Désolé, aucun résultat n'a été trouvé.",
            clarify: "Veuillez préciser lequel :",
            missing: "Veuillez préciser : {slot}.",
            more: "(et d'autres)",
        },
        Language::En => Generic {
            header: "Results found:",
            empty: "Sorry, no results were found.",
            clarify: "Please choose one:",
            missing: "Please provide the {slot}.",
            more: "(and more)",
        },
    }
}

/// Renders normalized results to user-facing text
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseRenderer;

impl ResponseRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        template: &Template,
        result: &NormalizedResult,
        language: Language,
    ) -> String {
        let messages = template.messages(language);
        let pick = |select: fn(&TemplateMessages) -> &Option<String>, fallback: &'static str| {
            messages
                .and_then(|m| select(m).as_deref())
                .unwrap_or(fallback)
                .to_string()
        };
        let fallback = generic(language);

        match result {
            NormalizedResult::Facts { rows, truncated } => {
                let mut lines = vec![pick(|m| &m.header, fallback.header)];
                for fact in rows {
                    lines.push(fact_line(template, fact));
                }
                if *truncated {
                    lines.push(fallback.more.to_string());
                }
                lines.join("\n")
            }
            NormalizedResult::NoResults => pick(|m| &m.empty, fallback.empty),
            NormalizedResult::Clarification { slot, candidates } => {
                let mut lines = vec![pick(|m| &m.clarify, fallback.clarify).replace("{slot}", slot)];
                for (position, candidate) in candidates.iter().enumerate() {
                    lines.push(format!("{}. {}", position + 1, candidate.label));
                }
                lines.join("\n")
            }
            NormalizedResult::MissingSlot { slot } => {
                pick(|m| &m.missing, fallback.missing).replace("{slot}", slot)
            }
        }
    }
}

/// `- subject (entity, entity) - literal - literal`
fn fact_line(template: &Template, fact: &hkq_core::Fact) -> String {
    let mut line = String::from("- ");
    line.push_str(
        &fact
            .display(&template.subject)
            .unwrap_or_else(|| "?".to_string()),
    );

    let mut entities = Vec::new();
    let mut literals = Vec::new();
    for variable in template.variables.iter().filter(|v| v.name != template.subject) {
        let Some(value) = fact.get(&variable.name) else {
            continue;
        };
        match (&variable.kind, value) {
            (ValueKind::Entity { .. }, FactValue::Entity { label, .. }) => {
                entities.push(label.clone())
            }
            _ => literals.push(value.display()),
        }
    }

    if !entities.is_empty() {
        line.push_str(&format!(" ({})", entities.join(", ")));
    }
    for literal in literals {
        line.push_str(" - ");
        line.push_str(&literal);
    }
    line
}
