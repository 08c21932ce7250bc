//! Binding-set cache
//!
//! Compilation is deterministic, so the compiled query text identifies a
//! store request. Results are cached by that text with a TTL and a capacity
//! bound (moka). The cache is cleared whenever the knowledge snapshot changes.
//!
//! Every clear starts a new generation. A turn records the generation before
//! it takes its snapshot and writes under it; entries from an older generation
//! are never stored or served, so a turn that straddles a reload cannot put
//! pre-reload bindings back.
//!
//! Author: hephaex@gmail.com

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};

use hkq_core::{BindingSet, CacheConfig, CompiledQuery};

/// Cache of store results keyed by compiled query text
#[derive(Clone)]
pub struct BindingCache {
    cache: Cache<String, (u64, Arc<BindingSet>)>,
    generation: Arc<AtomicU64>,
    stats: Arc<CacheStats>,
}

impl BindingCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        Self {
            cache,
            generation: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Current generation; bumped by every clear
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn get(&self, query: &CompiledQuery) -> Option<Arc<BindingSet>> {
        let current = self.generation();
        let result = self
            .cache
            .get(&query.text)
            .await
            .and_then(|(generation, bindings)| (generation == current).then_some(bindings));
        if result.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Store bindings fetched under `generation`; dropped if a clear happened since
    pub async fn put(&self, query: &CompiledQuery, generation: u64, bindings: Arc<BindingSet>) {
        if generation != self.generation() {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.cache
            .insert(query.text.clone(), (generation, bindings))
            .await;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry and start a new generation
    pub async fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
        // Wait for all pending invalidations to complete
        self.cache.run_pending_tasks().await;
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn report(&self) -> CacheStatsReport {
        self.stats.report(self.entry_count())
    }
}

/// Hit/miss counters
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    stale: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn report(&self, entries: u64) -> CacheStatsReport {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStatsReport {
            entries,
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            stale_writes: self.stale.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Serializable cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Writes dropped because a reload happened while the query ran
    pub stale_writes: u64,
    /// Full clears (one per reload)
    pub invalidations: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkq_core::BindingValue;

    fn query(text: &str) -> CompiledQuery {
        CompiledQuery {
            intent: "query_camps".to_string(),
            text: text.to_string(),
            subject: "camp".to_string(),
            output: vec![],
        }
    }

    fn bindings() -> Arc<BindingSet> {
        Arc::new(
            BindingSet::new(vec!["camp".into()])
                .with_row([("camp", BindingValue::iri("http://x#camp_rusayo"))]),
        )
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = BindingCache::new(&CacheConfig::default());
        let q = query("SELECT ?camp WHERE { ?camp ?p ?o . }");

        assert!(cache.get(&q).await.is_none());
        cache.put(&q, cache.generation(), bindings()).await;
        assert_eq!(cache.get(&q).await, Some(bindings()));
        assert!(cache.get(&query("SELECT ?other WHERE {}")).await.is_none());

        let report = cache.report();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 2);
        assert_eq!(report.writes, 1);
        assert!((report.hit_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clear_drops_entries() {
        let cache = BindingCache::new(&CacheConfig::default());
        let q = query("SELECT ?camp WHERE { ?camp ?p ?o . }");
        cache.put(&q, cache.generation(), bindings()).await;

        cache.clear().await;

        assert!(cache.get(&q).await.is_none());
        assert_eq!(cache.report().invalidations, 1);
    }

    #[tokio::test]
    async fn test_write_from_before_clear_is_dropped() {
        let cache = BindingCache::new(&CacheConfig::default());
        let q = query("SELECT ?camp WHERE { ?camp ?p ?o . }");
        let started = cache.generation();

        cache.clear().await;
        cache.put(&q, started, bindings()).await;

        assert!(cache.get(&q).await.is_none());
        let report = cache.report();
        assert_eq!((report.writes, report.stale_writes), (0, 1));

        cache.put(&q, cache.generation(), bindings()).await;
        assert_eq!(cache.get(&q).await, Some(bindings()));
    }
}
