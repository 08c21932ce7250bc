//! HKQ CLI - Command-line interface
//!
//! Usage:
//!   hkq compile --intent query_camps --lang sw --slot location=Goma
//!   hkq query --intent query_camps --lang fr --slot location=Goma
//!   hkq resolve --lang en --class Location goma
//!   hkq check
//!   hkq labels --lang sw

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hkq_core::{AppConfig, Language, QueryRequest, SlotValue};
use hkq_ontology::KnowledgeBase;
use hkq_pipeline::{CompileOutcome, QueryPipeline};
use hkq_store::SparqlHttpStore;

#[derive(Parser)]
#[command(name = "hkq")]
#[command(about = "Humanitarian knowledge query compiler")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ontology document, instead of the configured or bundled one
    #[arg(long, global = true)]
    ontology: Option<PathBuf>,

    /// Template catalog, instead of the configured or bundled one
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve slots and print the SPARQL query without executing it
    Compile {
        #[arg(long)]
        intent: String,
        #[arg(long, value_parser = parse_language)]
        lang: Language,
        /// Slot as role=text; repeatable
        #[arg(long = "slot", value_parser = parse_slot)]
        slots: Vec<SlotValue>,
    },
    /// Run a full turn against the SPARQL endpoint
    Query {
        #[arg(long)]
        intent: String,
        #[arg(long, value_parser = parse_language)]
        lang: Language,
        #[arg(long = "slot", value_parser = parse_slot)]
        slots: Vec<SlotValue>,
        /// SPARQL endpoint, instead of the configured one
        #[arg(long)]
        endpoint: Option<String>,
        /// Print the normalized result as JSON instead of the reply text
        #[arg(long)]
        json: bool,
    },
    /// Resolve one mention against the label index
    Resolve {
        #[arg(long, value_parser = parse_language)]
        lang: Language,
        /// Restrict candidates to this class
        #[arg(long)]
        class: Option<String>,
        text: String,
    },
    /// Validate the ontology and every template against it
    Check,
    /// Report label coverage for a language
    Labels {
        #[arg(long, value_parser = parse_language)]
        lang: Language,
    },
}

fn parse_language(tag: &str) -> Result<Language, String> {
    tag.parse::<Language>().map_err(|e| e.to_string())
}

fn parse_slot(raw: &str) -> Result<SlotValue, String> {
    let (role, text) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected role=text, got '{raw}'"))?;
    let role = role.trim();
    if role.is_empty() {
        return Err(format!("empty slot role in '{raw}'"));
    }
    Ok(SlotValue {
        role: role.to_string(),
        text: text.to_string(),
    })
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path.clone())
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::from_env().context("loading configuration from environment")?,
    };
    if let Some(path) = &cli.ontology {
        config.ontology.path = Some(path.clone());
    }
    if let Some(path) = &cli.templates {
        config.ontology.templates_path = Some(path.clone());
    }
    Ok(config)
}

fn pipeline(config: &AppConfig) -> anyhow::Result<QueryPipeline> {
    let store = SparqlHttpStore::from_config(&config.store)?;
    Ok(QueryPipeline::from_config(config, Arc::new(store))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Compile {
            intent,
            lang,
            slots,
        } => {
            let pipeline = pipeline(&config)?;
            let request = QueryRequest {
                intent,
                language: lang,
                slots,
            };
            match pipeline.compile_only(&request)? {
                CompileOutcome::Compiled { query } => println!("{}", query.text),
                CompileOutcome::Clarification { slot, candidates } => {
                    println!("Ambiguous slot '{slot}':");
                    for candidate in candidates {
                        println!(
                            "  {} ({}, {:.2})",
                            candidate.entity.local_name(),
                            candidate.label,
                            candidate.score
                        );
                    }
                }
                CompileOutcome::MissingSlot { slot } => {
                    bail!("required slot '{slot}' is missing or unresolved")
                }
            }
        }
        Commands::Query {
            intent,
            lang,
            slots,
            endpoint,
            json,
        } => {
            if let Some(endpoint) = endpoint {
                config.store.endpoint = endpoint;
            }
            let pipeline = pipeline(&config)?;
            let request = QueryRequest {
                intent,
                language: lang,
                slots,
            };
            let result = pipeline.handle(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", pipeline.render(&request.intent, &result, lang)?);
            }
        }
        Commands::Resolve { lang, class, text } => {
            let pipeline = pipeline(&config)?;
            let resolution = pipeline.resolve_mention(lang, &text, class.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Commands::Check => {
            let pipeline = pipeline(&config)?;
            let knowledge = pipeline.knowledge();
            println!(
                "ok: {} classes, {} properties, {} entities, {} templates",
                knowledge.schema.classes().count(),
                knowledge.schema.properties().count(),
                knowledge.schema.entity_count(),
                pipeline.templates().len()
            );
        }
        Commands::Labels { lang } => {
            let knowledge = KnowledgeBase::from_config(&config)?;
            if !knowledge.index.supports(lang) {
                bail!("language {lang:?} is not indexed");
            }
            let stats = knowledge.index.stats();
            println!(
                "{} labels in {lang:?}, {} entities without one",
                stats.per_language.get(&lang).copied().unwrap_or(0),
                stats.missing.get(&lang).copied().unwrap_or(0)
            );
            for entity in knowledge.schema.entities() {
                match knowledge.index.label_for(&entity.id, lang) {
                    Some((_, found)) if found == lang => {}
                    Some((label, found)) => {
                        println!("  {} -> {label} ({found:?})", entity.id.local_name())
                    }
                    None => println!("  {} -> (no label)", entity.id.local_name()),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slot() {
        let slot = parse_slot("location=Goma Ouest").unwrap();
        assert_eq!(slot.role, "location");
        assert_eq!(slot.text, "Goma Ouest");

        assert_eq!(parse_slot("min_capacity=5,000").unwrap().text, "5,000");
        assert!(parse_slot("Goma").is_err());
        assert!(parse_slot("=Goma").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_slots() {
        let cli = Cli::try_parse_from([
            "hkq",
            "compile",
            "--intent",
            "query_camps",
            "--lang",
            "fr-CD",
            "--slot",
            "location=Goma",
            "--slot",
            "manager=MSF",
        ])
        .unwrap();

        let Commands::Compile { lang, slots, .. } = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(lang, Language::Fr);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_unsupported_language_is_rejected() {
        assert!(Cli::try_parse_from(["hkq", "labels", "--lang", "ln"]).is_err());
    }
}
