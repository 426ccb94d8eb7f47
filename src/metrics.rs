use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub searches_total: IntCounter,
    pub search_errors: IntCounter,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub batch_writes_queued: IntCounter,
    pub batch_writes_flushed: IntCounter,
    pub source_failures: IntCounter,
    registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .unwrap_or_else(|e| panic!("invalid metric definition '{name}': {e}"));
    registry.register(Box::new(counter.clone())).ok();
    counter
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        Metrics {
            searches_total: counter(&registry, "searches_total", "Number of search requests"),
            search_errors: counter(&registry, "search_errors", "Number of failed search requests"),
            cache_hits: counter(&registry, "cache_hits", "Per-source cache hits"),
            cache_misses: counter(&registry, "cache_misses", "Per-source cache misses"),
            batch_writes_queued: counter(
                &registry,
                "batch_writes_queued",
                "Cache writes handed to the delayed batch writer",
            ),
            batch_writes_flushed: counter(
                &registry,
                "batch_writes_flushed",
                "Cache writes persisted by the delayed batch writer",
            ),
            source_failures: counter(
                &registry,
                "source_failures",
                "Channel or plugin searches that failed and were skipped",
            ),
            registry: Arc::new(registry),
        }
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
