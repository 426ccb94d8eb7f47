//! Search engine: fans a normalized request out to Telegram channels and
//! plugins, caches per-source results and assembles the engine response.
pub mod channel;
pub mod links;
pub mod merge;

use crate::cache::key::{channel_cache_key, plugin_cache_key};
use crate::cache::{DelayedBatchWriteManager, TwoLevelCache};
use crate::config::SharedConfig;
use crate::error::{PansouError, Result};
use crate::metrics::Metrics;
use crate::model::{SearchRequest, SearchResponse, SearchResult, SourceType};
use crate::plugin::PluginManager;
use log::{debug, info, warn};
use serde_json::Map;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

pub use channel::{ChannelSource, TelegramChannelSource};

/// Receives the engine's cache once it is open.
pub type CacheReadySender = watch::Sender<Option<Arc<TwoLevelCache>>>;
pub type CacheReadyReceiver = watch::Receiver<Option<Arc<TwoLevelCache>>>;

pub struct SearchService {
    config: SharedConfig,
    plugin_manager: Arc<PluginManager>,
    write_manager: Arc<DelayedBatchWriteManager>,
    channel_source: Arc<dyn ChannelSource>,
    cache: Option<Arc<TwoLevelCache>>,
    metrics: Arc<Metrics>,
}

/// Per-snapshot values a single search needs from the shared config.
struct SearchPlan {
    keyword: String,
    channels: Vec<String>,
    source: SourceType,
    concurrency: usize,
    plugins_enabled: bool,
    ttl: Duration,
}

impl SearchService {
    /// Build the engine. When caching is enabled the two-level cache is opened
    /// here and announced on `cache_ready`; a cache that fails to open leaves
    /// the engine uncached and the signal untouched.
    pub fn new(
        config: SharedConfig,
        plugin_manager: Arc<PluginManager>,
        write_manager: Arc<DelayedBatchWriteManager>,
        channel_source: Arc<dyn ChannelSource>,
        metrics: Arc<Metrics>,
        cache_ready: CacheReadySender,
    ) -> Self {
        let cache_settings = config.read().cache.clone();
        let cache = if cache_settings.enabled {
            match TwoLevelCache::open(&cache_settings) {
                Ok(cache) => {
                    let cache = Arc::new(cache);
                    info!("Result cache ready at {}", cache_settings.path.display());
                    cache_ready.send_replace(Some(Arc::clone(&cache)));
                    Some(cache)
                }
                Err(e) => {
                    warn!(
                        "Failed to open result cache at {}, searching uncached: {e}",
                        cache_settings.path.display()
                    );
                    None
                }
            }
        } else {
            debug!("Result cache disabled");
            None
        };

        Self {
            config,
            plugin_manager,
            write_manager,
            channel_source,
            cache,
            metrics,
        }
    }

    pub fn get_plugin_manager(&self) -> Arc<PluginManager> {
        Arc::clone(&self.plugin_manager)
    }

    pub fn cache(&self) -> Option<Arc<TwoLevelCache>> {
        self.cache.clone()
    }

    fn plan(&self, req: &SearchRequest) -> Result<SearchPlan> {
        let keyword = req.keyword.trim();
        if keyword.is_empty() {
            return Err(PansouError::InvalidRequest("keyword must not be empty".to_string()));
        }

        let config = self.config.read();
        Ok(SearchPlan {
            keyword: keyword.to_string(),
            channels: req
                .channels
                .clone()
                .unwrap_or_else(|| config.default_channels().to_vec()),
            source: req.source_type.clone().unwrap_or(SourceType::All),
            concurrency: req
                .concurrency
                .filter(|&c| c > 0)
                .unwrap_or_else(|| config.default_concurrency()),
            plugins_enabled: config.async_plugin_enabled(),
            ttl: config.cache.ttl(),
        })
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        self.metrics.searches_total.inc();
        let plan = match self.plan(req) {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.search_errors.inc();
                return Err(e);
            }
        };

        if let SourceType::Other(kind) = &plan.source {
            debug!("Source type '{kind}' matches no sources");
        }

        let started = Instant::now();
        let (channel_results, plugin_results) =
            tokio::join!(self.search_channels(&plan, req), self.search_plugins(&plan, req));

        let mut results = channel_results;
        results.extend(plugin_results);
        let results = merge::dedupe_and_sort(results);
        let results = merge::filter_cloud_types(results, req.cloud_types.as_deref());
        let response = merge::build_response(results, req.result_type.as_ref());

        info!(
            "Search '{}' finished with {} results in {:?}",
            plan.keyword,
            response.total,
            started.elapsed()
        );
        Ok(response)
    }

    async fn search_channels(&self, plan: &SearchPlan, req: &SearchRequest) -> Vec<SearchResult> {
        if !plan.source.includes_channels() || plan.channels.is_empty() {
            return Vec::new();
        }

        let key = channel_cache_key(&plan.keyword, &plan.channels);
        if !req.force_refresh {
            if let Some(cached) = self.load(&key) {
                return cached;
            }
        }

        let limit = Arc::new(Semaphore::new(plan.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for channel in &plan.channels {
            let source = Arc::clone(&self.channel_source);
            let limit = Arc::clone(&limit);
            let channel = channel.clone();
            let keyword = plan.keyword.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let outcome = source.search_channel(&channel, &keyword).await;
                (channel, outcome)
            });
        }

        let mut results = Vec::new();
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(found))) => results.extend(found),
                Ok((channel, Err(e))) => {
                    warn!("Channel '{channel}' search failed: {e}");
                    failed += 1;
                }
                Err(e) => {
                    warn!("Channel search task failed: {e}");
                    failed += 1;
                }
            }
        }
        self.metrics.source_failures.inc_by(failed as u64);

        // A partial fan-out is served but not cached.
        if failed == 0 {
            self.store(&key, &results, plan.ttl);
        }
        results
    }

    async fn search_plugins(&self, plan: &SearchPlan, req: &SearchRequest) -> Vec<SearchResult> {
        if !plan.source.includes_plugins() || !plan.plugins_enabled {
            return Vec::new();
        }

        let requested = req.plugins.as_deref();
        let names: Vec<String> = self
            .plugin_manager
            .select(requested)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        if names.is_empty() {
            return Vec::new();
        }

        let key = plugin_cache_key(&plan.keyword, &names, req.ext.as_ref());
        if !req.force_refresh {
            if let Some(cached) = self.load(&key) {
                return cached;
            }
        }

        let empty = Map::new();
        let ext = req.ext.as_ref().unwrap_or(&empty);
        let outcome = self
            .plugin_manager
            .search(requested, &plan.keyword, ext, plan.concurrency)
            .await;
        self.metrics.source_failures.inc_by(outcome.failed as u64);

        if outcome.failed == 0 {
            self.store(&key, &outcome.results, plan.ttl);
        }
        outcome.results
    }

    fn load(&self, key: &str) -> Option<Vec<SearchResult>> {
        let cache = self.cache.as_ref()?;
        let Some(bytes) = cache.get(key) else {
            self.metrics.cache_misses.inc();
            return None;
        };

        match serde_json::from_slice(&bytes) {
            Ok(results) => {
                self.metrics.cache_hits.inc();
                debug!("Cache hit for '{key}'");
                Some(results)
            }
            Err(e) => {
                warn!("Ignoring undecodable cache entry '{key}': {e}");
                self.metrics.cache_misses.inc();
                None
            }
        }
    }

    fn store(&self, key: &str, results: &[SearchResult], ttl: Duration) {
        let Some(cache) = &self.cache else {
            return;
        };

        let data = match serde_json::to_vec(results) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode results for '{key}': {e}");
                return;
            }
        };

        cache.set_memory_only(key, &data, ttl);
        if let Err(e) = self.write_manager.enqueue(key, data, ttl) {
            debug!("Durable write for '{key}' not queued: {e}");
        }
    }
}
