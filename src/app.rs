//! Service lifecycle: ordered startup, the inbound search and health calls,
//! and the two-phase shutdown that persists cached results before exit.
use crate::cache::DelayedBatchWriteManager;
use crate::config::{AppConfig, SharedConfig};
use crate::dto;
use crate::error::{PansouError, Result};
use crate::health;
use crate::http::init_http_client;
use crate::metrics::Metrics;
use crate::model::SearchRequest;
use crate::normalize::normalize;
use crate::plugin::{filter_enabled, init_async_plugin_system, PluginManager, PluginRegistry};
use crate::search::{CacheReadyReceiver, ChannelSource, SearchService, TelegramChannelSource};
use crate::shaper::shape_response;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pluggable parts of the service. The default uses the process-wide plugin
/// registry and the public Telegram web preview.
pub struct Collaborators {
    pub registry: Arc<PluginRegistry>,
    pub channel_source: Arc<dyn ChannelSource>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            registry: PluginRegistry::global(),
            channel_source: Arc::new(TelegramChannelSource::new()),
        }
    }
}

/// Main application structure that owns every long-lived component
pub struct PansouApp {
    config: SharedConfig,
    metrics: Arc<Metrics>,
    write_manager: Arc<DelayedBatchWriteManager>,
    engine: SearchService,
    wiring: Mutex<Option<JoinHandle<bool>>>,
    cancel: CancellationToken,
    shutdown_started: AtomicBool,
}

impl PansouApp {
    /// Load configuration from `config_path` (or the usual locations) and start.
    pub fn startup_from_path(
        config_path: Option<&Path>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let config = AppConfig::load(config_path)
            .map_err(|e| PansouError::Config(format!("{e:#}")))?;
        Self::startup(config, collaborators)
    }

    /// Bring the service up. Must be called from within a Tokio runtime.
    ///
    /// A cache write manager that cannot be created or started is fatal. The
    /// main cache updater is wired in the background once the engine's cache
    /// is ready and never holds up or fails startup.
    pub fn startup(mut config: AppConfig, collaborators: Collaborators) -> Result<Self> {
        info!("Starting pansou {}", env!("CARGO_PKG_VERSION"));

        init_http_client(&config.http);

        let metrics = Arc::new(Metrics::new());
        let write_manager =
            DelayedBatchWriteManager::new(config.batch_write.clone(), Arc::clone(&metrics))
                .map(Arc::new)
                .map_err(|e| PansouError::Startup(format!("cache write manager: {e}")))?;
        write_manager
            .initialize()
            .map_err(|e| PansouError::Startup(format!("cache write manager: {e}")))?;

        let (cache_ready_tx, cache_ready_rx) = watch::channel(None);

        let plugin_runtime = init_async_plugin_system(&config.plugins);
        let mut plugin_manager = PluginManager::new(plugin_runtime);
        if config.async_plugin_enabled() {
            let discovered: Vec<String> = collaborators
                .registry
                .get_registered_plugins()
                .iter()
                .map(|p| p.name().to_string())
                .collect();
            let names = filter_enabled(&discovered, &config.plugins);
            plugin_manager.register_global_plugins_with_filter(&collaborators.registry, &names);
        } else {
            debug!("Async plugins disabled");
        }

        let active_plugins = if config.async_plugin_enabled() {
            plugin_manager.get_plugins().len()
        } else {
            0
        };
        config.update_default_concurrency(active_plugins);
        info!(
            "{} channels, {} plugins, default concurrency {}",
            config.default_channels().len(),
            active_plugins,
            config.default_concurrency()
        );

        let cache_ready_timeout = config.lifecycle.cache_ready_timeout();
        let config = config.into_shared();
        let engine = SearchService::new(
            Arc::clone(&config),
            Arc::new(plugin_manager),
            Arc::clone(&write_manager),
            collaborators.channel_source,
            Arc::clone(&metrics),
            cache_ready_tx,
        );

        // The engine has announced its cache (if any) before the wiring task exists.
        let cancel = CancellationToken::new();
        let wiring = tokio::spawn(wire_main_cache_updater(
            cache_ready_rx,
            Arc::clone(&write_manager),
            cache_ready_timeout,
            cancel.child_token(),
        ));

        info!("Startup complete");
        Ok(Self {
            config,
            metrics,
            write_manager,
            engine,
            wiring: Mutex::new(Some(wiring)),
            cancel,
            shutdown_started: AtomicBool::new(false),
        })
    }

    /// Normalize, search and shape. Engine errors are returned unchanged.
    pub async fn search(&self, req: SearchRequest) -> Result<dto::SearchResponse> {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return Err(PansouError::ShuttingDown);
        }

        let req = normalize(req, &self.config.read());
        let response = self.engine.search(&req).await?;
        Ok(shape_response(response))
    }

    pub fn health(&self, _req: dto::HealthRequest) -> dto::HealthResponse {
        health::report(&self.config.read(), &self.engine.get_plugin_manager())
    }

    pub fn config(&self) -> SharedConfig {
        Arc::clone(&self.config)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_writer(&self) -> Arc<DelayedBatchWriteManager> {
        Arc::clone(&self.write_manager)
    }

    /// Persist everything cached before the process exits.
    ///
    /// Phase 1 drains the batch writer, phase 2 flushes the memory tier of the
    /// result cache. Both share one deadline. Only the first call does work.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            info!("Shutdown already requested");
            return Ok(());
        }

        let budget = self.config.read().lifecycle.shutdown_timeout();
        let deadline = Instant::now() + budget;
        info!("Shutting down (budget {budget:?})");

        self.settle_wiring(deadline).await;
        self.cancel.cancel();

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = self.write_manager.shutdown(remaining).await {
            error!("Flushing delayed cache writes failed: {e}");
            return Err(e);
        }

        if let Some(cache) = self.engine.cache() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let flush = tokio::task::spawn_blocking(move || cache.flush_memory_to_disk());
            match tokio::time::timeout(remaining, flush).await {
                Ok(Ok(Ok(written))) => debug!("Flushed {written} cache entries to disk"),
                Ok(Ok(Err(e))) => {
                    error!("Flushing the memory cache failed: {e}");
                    return Err(e);
                }
                Ok(Err(join_error)) => {
                    return Err(PansouError::Other(format!(
                        "memory flush task failed: {join_error}"
                    )));
                }
                Err(_) => {
                    error!("Flushing the memory cache exceeded the shutdown budget");
                    return Err(PansouError::ShutdownTimeout {
                        phase: "memory flush",
                        timeout: budget,
                    });
                }
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Let a pending wiring task finish so queued writes have somewhere to go.
    /// If the cache never came up there is nothing to wait for.
    async fn settle_wiring(&self, deadline: Instant) {
        let handle = self.wiring.lock().take();
        let Some(handle) = handle else {
            return;
        };

        if self.engine.cache().is_none() {
            self.cancel.cancel();
        }

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(wired)) => debug!("Cache updater wiring settled (wired: {wired})"),
            Ok(Err(e)) => warn!("Cache updater wiring task failed: {e}"),
            Err(_) => warn!("Cache updater wiring did not settle before the shutdown deadline"),
        }
    }
}

impl Drop for PansouApp {
    fn drop(&mut self) {
        if !self.shutdown_started.load(Ordering::SeqCst) {
            warn!(
                "Service dropped without shutdown; {} pending cache writes may be lost",
                self.write_manager.pending_len()
            );
        }
        self.cancel.cancel();
    }
}

/// Register the main cache updater once the engine's cache is ready.
///
/// Waits at most `timeout`. Returns whether the updater was registered.
pub async fn wire_main_cache_updater(
    mut cache_ready: CacheReadyReceiver,
    write_manager: Arc<DelayedBatchWriteManager>,
    timeout: Duration,
    cancel: CancellationToken,
) -> bool {
    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Cache updater wiring cancelled");
            return false;
        }
        waited = tokio::time::timeout(timeout, cache_ready.wait_for(Option::is_some)) => waited,
    };

    let cache = match waited {
        Ok(Ok(ready)) => ready.clone(),
        Ok(Err(_)) => {
            info!("No result cache available; delayed cache writes will stay queued");
            return false;
        }
        Err(_) => {
            warn!("Result cache not ready after {timeout:?}; main cache updater not registered");
            return false;
        }
    };
    let Some(cache) = cache else {
        return false;
    };

    write_manager
        .set_main_cache_updater(move |key, data, ttl| cache.set_both_levels(key, data, ttl));
    info!("Main cache updater registered");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TwoLevelCache;
    use crate::cache::key::channel_cache_key;
    use crate::config::{BatchWriteSettings, CacheSettings};
    use crate::model::{Link, ResultOrigin, SearchResult};
    use crate::search::channel::MockChannelSource;

    fn config(cache_dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.search.default_channels = vec!["a".to_string()];
        config.plugins.async_plugin_enabled = false;
        config.cache.path = cache_dir.to_path_buf();
        config.batch_write.flush_interval_secs = 3600;
        config
    }

    fn collaborators(source: MockChannelSource) -> Collaborators {
        Collaborators {
            registry: Arc::new(PluginRegistry::new()),
            channel_source: Arc::new(source),
        }
    }

    fn manager() -> Arc<DelayedBatchWriteManager> {
        let metrics = Arc::new(Metrics::new());
        Arc::new(DelayedBatchWriteManager::new(BatchWriteSettings::default(), metrics).unwrap())
    }

    fn start(config: AppConfig, source: MockChannelSource) -> PansouApp {
        PansouApp::startup(config, collaborators(source)).unwrap()
    }

    fn serving(results: usize) -> MockChannelSource {
        let mut source = MockChannelSource::new();
        source.expect_search_channel().returning(move |channel, _| {
            Ok((0..results)
                .map(|i| SearchResult {
                    message_id: i.to_string(),
                    unique_id: format!("{channel}-{i}"),
                    channel: channel.to_string(),
                    datetime: "2024-05-01T08:00:00Z".to_string(),
                    title: format!("post {i}"),
                    content: String::new(),
                    links: vec![Link {
                        kind: "quark".to_string(),
                        url: format!("https://pan.quark.cn/s/{channel}{i}"),
                        password: String::new(),
                    }],
                    tags: vec![],
                    images: vec![],
                    origin: ResultOrigin::Channel(channel.to_string()),
                })
                .collect())
        });
        source
    }

    async fn wait_for_updater(app: &PansouApp) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !app.write_manager.has_main_cache_updater() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(app.write_manager.has_main_cache_updater());
    }

    #[test]
    fn test_startup_outside_runtime_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let result = PansouApp::startup(config, collaborators(MockChannelSource::new()));
        assert!(matches!(result, Err(PansouError::Startup(_))));
    }

    #[tokio::test]
    async fn test_invalid_batch_settings_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.batch_write.max_pending = 0;
        let result = PansouApp::startup(config, collaborators(MockChannelSource::new()));
        assert!(matches!(result, Err(PansouError::Startup(_))));
    }

    #[tokio::test]
    async fn test_wiring_registers_updater_when_cache_ready() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            TwoLevelCache::open(&CacheSettings {
                path: dir.path().to_path_buf(),
                ..CacheSettings::default()
            })
            .unwrap(),
        );
        let (tx, rx) = watch::channel(None);
        let writer = manager();

        let task = tokio::spawn(wire_main_cache_updater(
            rx,
            Arc::clone(&writer),
            Duration::from_secs(5),
            CancellationToken::new(),
        ));
        tx.send_replace(Some(cache));

        assert!(task.await.unwrap());
        assert!(writer.has_main_cache_updater());
    }

    #[tokio::test]
    async fn test_wiring_times_out_without_cache() {
        let (_tx, rx) = watch::channel(None);
        let writer = manager();
        let wired = wire_main_cache_updater(
            rx,
            Arc::clone(&writer),
            Duration::from_millis(20),
            CancellationToken::new(),
        )
        .await;
        assert!(!wired);
        assert!(!writer.has_main_cache_updater());
    }

    #[tokio::test]
    async fn test_wiring_honours_cancellation() {
        let (_tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wired =
            wire_main_cache_updater(rx, manager(), Duration::from_secs(60), cancel).await;
        assert!(!wired);
    }

    #[tokio::test]
    async fn test_search_after_shutdown_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let app = start(config(dir.path()), MockChannelSource::new());
        app.shutdown().await.unwrap();
        app.shutdown().await.unwrap();

        let err = app.search(SearchRequest::new("dune")).await.unwrap_err();
        assert!(matches!(err, PansouError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_health_with_plugins_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let app = start(config(dir.path()), MockChannelSource::new());

        let health = app.health(dto::HealthRequest::default());
        assert_eq!(health.status, "ok");
        assert_eq!(health.channels, vec!["a".to_string()]);
        assert_eq!(health.plugin_count, 0);
        assert!(health.plugins.is_none());
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_cache_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.cache.enabled = false;
        let mut source = MockChannelSource::new();
        source.expect_search_channel().returning(|_, _| Ok(Vec::new()));

        let app = PansouApp::startup(config, collaborators(source)).unwrap();
        let response = app.search(SearchRequest::new("dune")).await.unwrap();
        assert_eq!(response.total, 0);
        assert!(response.results.is_empty());
        app.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_ready_timeout_still_wires_updater() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.lifecycle.cache_ready_timeout_ms = 0;

        let app = start(config, serving(1));
        wait_for_updater(&app).await;
        app.search(SearchRequest::new("dune")).await.unwrap();
        assert_eq!(app.write_manager.pending_len(), 1);
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_drain_skips_memory_flush() {
        let dir = tempfile::tempdir().unwrap();
        let app = start(config(dir.path()), serving(1));
        wait_for_updater(&app).await;
        app.write_manager.set_main_cache_updater(|_key, _data, _ttl| {
            Err(PansouError::Other("disk full".to_string()))
        });

        app.search(SearchRequest::new("dune")).await.unwrap();
        assert_eq!(app.write_manager.pending_len(), 1);

        let err = app.shutdown().await.unwrap_err();
        assert!(matches!(err, PansouError::Other(ref msg) if msg == "disk full"));
        drop(app);

        let reopened = TwoLevelCache::open(&config(dir.path()).cache).unwrap();
        let key = channel_cache_key("dune", &["a".to_string()]);
        assert!(reopened.get(&key).is_none());
    }

    #[tokio::test]
    async fn test_memory_flush_failure_is_returned() {
        let root = tempfile::tempdir().unwrap();
        let cache_dir = root.path().join("cache");
        let app = start(config(&cache_dir), serving(1));
        wait_for_updater(&app).await;
        app.write_manager.set_main_cache_updater(|_key, _data, _ttl| Ok(()));

        app.search(SearchRequest::new("dune")).await.unwrap();
        std::fs::remove_dir_all(&cache_dir).unwrap();

        let err = app.shutdown().await.unwrap_err();
        assert!(matches!(err, PansouError::Io(_)));
    }
}
