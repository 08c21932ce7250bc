//! HKQ Pipeline - Per-turn orchestration
//!
//! One [`QueryPipeline::handle`] call serves one conversational turn:
//!
//! 1. Look up the template for the intent
//! 2. Resolve every slot the template declares against one knowledge snapshot
//! 3. Compile, or stop with a clarification / missing-slot outcome
//! 4. Execute through the injected [`QueryExecutor`] under a timeout
//! 5. Normalize the bindings into language-tagged facts
//!
//! Turns share nothing mutable except the binding cache, so they may run
//! concurrently. Reloading installs a new snapshot atomically; turns already
//! running keep the snapshot they started with.
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod render;

pub use cache::{BindingCache, CacheStatsReport};
pub use render::ResponseRenderer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use hkq_core::{
    AppConfig, BindingSet, Candidate, CompiledQuery, CompilerConfig, HkqError, Language,
    NormalizedResult, QueryExecutor, QueryRequest, Resolution, Result, StoreError, ValueKind,
};
use hkq_ontology::{KnowledgeBase, SharedKnowledge};
use hkq_query::{CompileError, QueryCompiler, ResultNormalizer, Template, TemplateRegistry};

/// Result of compiling without executing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompileOutcome {
    Compiled { query: CompiledQuery },
    Clarification { slot: String, candidates: Vec<Candidate> },
    MissingSlot { slot: String },
}

impl CompileOutcome {
    /// The equivalent normalized result when no query was produced
    fn into_result(self) -> std::result::Result<CompiledQuery, NormalizedResult> {
        match self {
            Self::Compiled { query } => Ok(query),
            Self::Clarification { slot, candidates } => {
                Err(NormalizedResult::Clarification { slot, candidates })
            }
            Self::MissingSlot { slot } => Err(NormalizedResult::MissingSlot { slot }),
        }
    }
}

/// What a reload changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub previous_entities: usize,
    pub entities: usize,
    pub labels: usize,
}

/// The per-turn orchestrator
pub struct QueryPipeline {
    knowledge: SharedKnowledge,
    templates: TemplateRegistry,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<BindingCache>,
    resolver: hkq_ontology::EntityResolver,
    renderer: ResponseRenderer,
    compiler: CompilerConfig,
    max_rows: usize,
    timeout: Duration,
    config: AppConfig,
}

impl QueryPipeline {
    /// Assemble a pipeline. Every template is checked against the schema
    /// first; a mismatched catalog is a configuration error.
    pub fn new(
        knowledge: KnowledgeBase,
        templates: TemplateRegistry,
        executor: Arc<dyn QueryExecutor>,
        config: &AppConfig,
    ) -> Result<Self> {
        check_templates(&knowledge, &templates, &config.compiler)?;

        let cache = config.cache.enabled.then(|| BindingCache::new(&config.cache));
        info!(
            templates = templates.len(),
            executor = executor.name(),
            cache = cache.is_some(),
            "Query pipeline ready"
        );

        Ok(Self {
            knowledge: SharedKnowledge::new(knowledge),
            templates,
            executor,
            cache,
            resolver: hkq_ontology::EntityResolver::new(&config.resolver),
            renderer: ResponseRenderer::new(),
            compiler: config.compiler.clone(),
            max_rows: config.normalizer.max_rows,
            timeout: config.store.execution_budget(),
            config: config.clone(),
        })
    }

    /// Load the configured ontology and template catalog
    pub fn from_config(config: &AppConfig, executor: Arc<dyn QueryExecutor>) -> Result<Self> {
        let knowledge = KnowledgeBase::from_config(config)?;
        let templates = TemplateRegistry::from_config(config)?;
        Self::new(knowledge, templates, executor, config)
    }

    /// Override the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn knowledge(&self) -> Arc<KnowledgeBase> {
        self.knowledge.snapshot()
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    pub fn cache_report(&self) -> Option<CacheStatsReport> {
        self.cache.as_ref().map(BindingCache::report)
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Serve one turn
    pub async fn handle(&self, request: &QueryRequest) -> Result<NormalizedResult> {
        let span = info_span!(
            "turn",
            request_id = %Uuid::new_v4(),
            intent = %request.intent,
            language = %request.language,
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &QueryRequest) -> Result<NormalizedResult> {
        let template = self.template(&request.intent)?;
        // Generation first: a reload swaps the snapshot before it clears the cache
        let generation = self.cache.as_ref().map(BindingCache::generation);
        let knowledge = self.knowledge.snapshot();

        let query = match self.prepare(&knowledge, template, request)?.into_result() {
            Ok(query) => query,
            Err(outcome) => {
                debug!(outcome = ?outcome, "Turn ended before execution");
                return Ok(outcome);
            }
        };

        let bindings = self.execute(&query, generation).await?;
        let result = ResultNormalizer::new(&knowledge.index, self.max_rows).normalize(
            &bindings,
            &query,
            request.language,
        );
        debug!(rows = bindings.len(), "Turn complete");
        Ok(result)
    }

    /// Resolve and compile without executing
    pub fn compile_only(&self, request: &QueryRequest) -> Result<CompileOutcome> {
        let template = self.template(&request.intent)?;
        let knowledge = self.knowledge.snapshot();
        self.prepare(&knowledge, template, request)
    }

    /// Resolve a single mention, optionally restricted to a class
    pub fn resolve_mention(
        &self,
        language: Language,
        text: &str,
        class: Option<&str>,
    ) -> Result<Resolution> {
        let knowledge = self.knowledge.snapshot();
        if let Some(class) = class {
            if knowledge.schema.class(class).is_none() {
                return Err(HkqError::InvalidInput(format!("unknown class '{class}'")));
            }
        }
        self.resolver.resolve(&knowledge, "mention", language, text, class)
    }

    /// Reply text for a turn's result
    pub fn render(&self, intent: &str, result: &NormalizedResult, language: Language) -> Result<String> {
        let template = self.templates.template_for(intent)?;
        Ok(self.renderer.render(template, result, language))
    }

    fn template(&self, intent: &str) -> Result<&Template> {
        self.templates.template_for(intent).inspect_err(|_| {
            error!(intent, "No template for intent");
        })
    }

    fn prepare(
        &self,
        knowledge: &KnowledgeBase,
        template: &Template,
        request: &QueryRequest,
    ) -> Result<CompileOutcome> {
        if !knowledge.index.supports(request.language) {
            return Err(HkqError::UnsupportedLanguage(request.language.to_string()));
        }

        let resolutions = self.resolve_slots(knowledge, template, request)?;
        let compiler = QueryCompiler::new(&knowledge.schema, &self.compiler);

        match compiler.compile(template, &resolutions) {
            Ok(query) => Ok(CompileOutcome::Compiled { query }),
            Err(CompileError::UnresolvedRequiredSlot { slot }) => {
                Ok(CompileOutcome::MissingSlot { slot })
            }
            Err(CompileError::AmbiguousRequiredSlot { slot, candidates }) => {
                Ok(CompileOutcome::Clarification { slot, candidates })
            }
            Err(err @ CompileError::SchemaViolation { .. }) => {
                error!(error = %err, "Template does not fit the schema");
                Err(err.into())
            }
        }
    }

    fn resolve_slots(
        &self,
        knowledge: &KnowledgeBase,
        template: &Template,
        request: &QueryRequest,
    ) -> Result<BTreeMap<String, Resolution>> {
        let mut resolutions = BTreeMap::new();

        for slot in &request.slots {
            let Some(kind) = template.slot_kind(&slot.role) else {
                debug!(slot = %slot.role, "Slot has no placeholder in template, ignored");
                continue;
            };
            if resolutions.contains_key(&slot.role) {
                debug!(slot = %slot.role, "Repeated slot, keeping the first value");
                continue;
            }

            let resolution = match kind {
                ValueKind::Entity { class } => self.resolver.resolve(
                    knowledge,
                    &slot.role,
                    request.language,
                    &slot.text,
                    Some(class),
                )?,
                ValueKind::Literal { datatype } => {
                    self.resolver
                        .resolve_literal(&slot.role, &slot.text, *datatype)
                }
            };
            resolutions.insert(slot.role.clone(), resolution);
        }
        Ok(resolutions)
    }

    /// Run a compiled query through the cache and the executor
    async fn execute(
        &self,
        query: &CompiledQuery,
        generation: Option<u64>,
    ) -> Result<Arc<BindingSet>> {
        if let Some(cache) = &self.cache {
            if let Some(bindings) = cache.get(query).await {
                debug!(fingerprint = query.fingerprint(), "Binding cache hit");
                return Ok(bindings);
            }
        }

        let outcome = tokio::time::timeout(self.timeout, self.executor.execute(query))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)));

        let bindings = match outcome {
            Ok(bindings) => Arc::new(bindings),
            Err(err @ StoreError::MalformedQuery(_)) => {
                error!(
                    fingerprint = query.fingerprint(),
                    error = %err,
                    "Store rejected a compiled query"
                );
                return Err(err.into());
            }
            Err(err) => {
                debug!(executor = self.executor.name(), error = %err, "Execution failed");
                return Err(err.into());
            }
        };

        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            cache.put(query, generation, Arc::clone(&bindings)).await;
        }
        Ok(bindings)
    }

    // ------------------------------------------------------------------
    // Reload
    // ------------------------------------------------------------------

    /// Install a new knowledge snapshot. Templates are checked against the new
    /// schema before the swap; on failure the current snapshot stays.
    pub async fn reload(&self, knowledge: KnowledgeBase) -> Result<ReloadSummary> {
        check_templates(&knowledge, &self.templates, &self.compiler)?;

        let entities = knowledge.schema.entity_count();
        let labels = knowledge.index.stats().labels;
        let previous = self.knowledge.replace(knowledge);

        if let Some(cache) = &self.cache {
            cache.clear().await;
        }

        let summary = ReloadSummary {
            previous_entities: previous.schema.entity_count(),
            entities,
            labels,
        };
        info!(
            previous = summary.previous_entities,
            entities, labels, "Knowledge reloaded"
        );
        Ok(summary)
    }

    /// Rebuild from a JSON ontology document
    pub async fn reload_json(&self, document: &str) -> Result<ReloadSummary> {
        let knowledge = KnowledgeBase::from_json(
            document,
            &self.config.ontology.languages,
            self.config.resolver.min_partial_length,
        )?;
        self.reload(knowledge).await
    }

    /// Rebuild from the configured ontology source
    pub async fn reload_from_source(&self) -> Result<ReloadSummary> {
        let knowledge = KnowledgeBase::from_config(&self.config)?;
        self.reload(knowledge).await
    }
}

fn check_templates(
    knowledge: &KnowledgeBase,
    templates: &TemplateRegistry,
    config: &CompilerConfig,
) -> Result<()> {
    let compiler = QueryCompiler::new(&knowledge.schema, config);
    for template in templates.templates() {
        compiler.check(template).map_err(|err| {
            error!(intent = %template.intent, error = %err, "Template check failed");
            HkqError::from(err)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(
            &self,
            _query: &CompiledQuery,
        ) -> std::result::Result<BindingSet, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BindingSet::new(vec!["camp".into()]))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn pipeline(executor: Arc<dyn QueryExecutor>) -> QueryPipeline {
        let config = AppConfig::default();
        QueryPipeline::new(
            KnowledgeBase::builtin(&Language::ALL).unwrap(),
            TemplateRegistry::builtin().unwrap(),
            executor,
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_intent_is_an_error() {
        let pipeline = pipeline(Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        }));
        let request = QueryRequest::new("book_flight", Language::En);

        assert!(matches!(
            pipeline.handle(&request).await,
            Err(HkqError::UnknownIntent(_))
        ));
    }

    #[tokio::test]
    async fn test_repeated_turn_is_served_from_cache() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(executor.clone());
        let request = QueryRequest::new("query_camps", Language::Sw).with_slot("location", "Goma");

        pipeline.handle(&request).await.unwrap();
        pipeline.handle(&request).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        let report = pipeline.cache_report().unwrap();
        assert_eq!((report.hits, report.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_reload_clears_cache() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline(executor.clone());
        let request = QueryRequest::new("query_camps", Language::Sw);

        pipeline.handle(&request).await.unwrap();
        let summary = pipeline
            .reload(KnowledgeBase::builtin(&Language::ALL).unwrap())
            .await
            .unwrap();
        pipeline.handle(&request).await.unwrap();

        assert_eq!(summary.entities, summary.previous_entities);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    struct SlowExecutor {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl QueryExecutor for SlowExecutor {
        async fn execute(
            &self,
            _query: &CompiledQuery,
        ) -> std::result::Result<BindingSet, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(BindingSet::new(vec!["camp".into()]))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_turn_straddling_reload_does_not_refill_cache() {
        let executor = Arc::new(SlowExecutor {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let pipeline = pipeline(executor.clone());
        let request = QueryRequest::new("query_camps", Language::Sw);

        let reload = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pipeline
                .reload(KnowledgeBase::builtin(&Language::ALL).unwrap())
                .await
        };
        let (turn, reloaded) = tokio::join!(pipeline.handle(&request), reload);
        turn.unwrap();
        reloaded.unwrap();

        let report = pipeline.cache_report().unwrap();
        assert_eq!((report.writes, report.stale_writes), (0, 1));

        pipeline.handle(&request).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reload_rejects_schema_that_breaks_templates() {
        let pipeline = pipeline(Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        }));
        let document = r#"{
            "namespace": "http://example.org/humanitarian#",
            "prefix": "humanitarian",
            "classes": [{ "id": "Location", "labels": { "en": ["location"] } }],
            "properties": [],
            "entities": []
        }"#;

        let before = pipeline.knowledge();
        assert!(pipeline.reload_json(document).await.is_err());
        assert!(Arc::ptr_eq(&before, &pipeline.knowledge()));
    }

    #[test]
    fn test_resolve_mention_validates_class() {
        let pipeline = pipeline(Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        }));

        assert!(matches!(
            pipeline.resolve_mention(Language::Sw, "Goma", Some("Planet")),
            Err(HkqError::InvalidInput(_))
        ));
        assert!(pipeline
            .resolve_mention(Language::Sw, "Goma", Some("Location"))
            .unwrap()
            .is_resolved());
    }
}
