//! Plugin system for extra search sources
//!
//! Plugins register themselves in a [`PluginRegistry`] (normally the
//! process-wide one). At startup a [`PluginManager`] picks the registered
//! plugins the configuration allows and hands them to the search engine.
use crate::config::PluginSettings;
use crate::error::{PansouError, Result};
use crate::model::{ResultOrigin, SearchResult};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Trait for asynchronous search plugins
#[async_trait]
pub trait AsyncSearchPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Lower value runs first.
    fn priority(&self) -> u32 {
        3
    }

    async fn search(&self, keyword: &str, ext: &Map<String, Value>) -> Result<Vec<SearchResult>>;
}

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<PluginRegistry> = Arc::new(PluginRegistry::new());
}

/// Name-indexed set of available plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn AsyncSearchPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<PluginRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register a plugin. The first plugin registered under a name is kept.
    pub fn register(&self, plugin: Arc<dyn AsyncSearchPlugin>) -> bool {
        let name = plugin.name().to_lowercase();
        let mut plugins = self.plugins.write();
        if plugins.contains_key(&name) {
            warn!("Plugin '{name}' is already registered; ignoring duplicate");
            return false;
        }
        plugins.insert(name, plugin);
        true
    }

    /// All registered plugins, ordered by name.
    pub fn get_registered_plugins(&self) -> Vec<Arc<dyn AsyncSearchPlugin>> {
        self.plugins.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn register_global_plugin(plugin: Arc<dyn AsyncSearchPlugin>) -> bool {
    GLOBAL_REGISTRY.register(plugin)
}

pub fn get_registered_plugins() -> Vec<Arc<dyn AsyncSearchPlugin>> {
    GLOBAL_REGISTRY.get_registered_plugins()
}

/// Execution settings shared by every plugin search.
#[derive(Debug, Clone)]
pub struct PluginRuntime {
    pub timeout: Duration,
}

/// Prepare the plugin execution runtime.
pub fn init_async_plugin_system(settings: &PluginSettings) -> PluginRuntime {
    let runtime = PluginRuntime {
        timeout: settings.timeout(),
    };
    info!(
        "Async plugin system ready (per-plugin timeout {:?})",
        runtime.timeout
    );
    runtime
}

/// Apply the configured allow-list to discovered plugin names.
pub fn filter_enabled(names: &[String], settings: &PluginSettings) -> Vec<String> {
    match &settings.enabled_plugins {
        None => names.to_vec(),
        Some(allowed) => names
            .iter()
            .filter(|name| allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(name)))
            .cloned()
            .collect(),
    }
}

/// Plugin manager that holds the plugins active for this process
pub struct PluginManager {
    plugins: Vec<Arc<dyn AsyncSearchPlugin>>,
    runtime: PluginRuntime,
}

impl PluginManager {
    pub fn new(runtime: PluginRuntime) -> Self {
        Self {
            plugins: Vec::new(),
            runtime,
        }
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn AsyncSearchPlugin>) {
        if self
            .plugins
            .iter()
            .any(|p| p.name().eq_ignore_ascii_case(plugin.name()))
        {
            return;
        }
        self.plugins.push(plugin);
        self.plugins
            .sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.name().cmp(b.name())));
    }

    /// Register the plugins of `registry` whose names appear in `names`.
    pub fn register_global_plugins_with_filter(
        &mut self,
        registry: &PluginRegistry,
        names: &[String],
    ) -> usize {
        let before = self.plugins.len();
        for plugin in registry.get_registered_plugins() {
            if names.iter().any(|n| n.eq_ignore_ascii_case(plugin.name())) {
                self.register_plugin(plugin);
            }
        }
        let added = self.plugins.len() - before;
        info!("Registered {added} of {} discovered plugins", registry.len());
        added
    }

    pub fn get_plugins(&self) -> &[Arc<dyn AsyncSearchPlugin>] {
        &self.plugins
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Active plugins restricted to `requested`; `None` selects all of them.
    pub fn select(&self, requested: Option<&[String]>) -> Vec<Arc<dyn AsyncSearchPlugin>> {
        match requested {
            None => self.plugins.clone(),
            Some(names) => self
                .plugins
                .iter()
                .filter(|p| names.iter().any(|n| n.trim().eq_ignore_ascii_case(p.name())))
                .cloned()
                .collect(),
        }
    }

    /// Run one plugin under the runtime timeout and tag its results.
    pub async fn search_plugin(
        &self,
        plugin: &Arc<dyn AsyncSearchPlugin>,
        keyword: &str,
        ext: &Map<String, Value>,
    ) -> Result<Vec<SearchResult>> {
        run_plugin(Arc::clone(plugin), keyword, ext, self.runtime.timeout).await
    }

    /// Search the selected plugins concurrently, at most `concurrency` at a time.
    /// A failing plugin is logged and contributes nothing.
    pub async fn search(
        &self,
        requested: Option<&[String]>,
        keyword: &str,
        ext: &Map<String, Value>,
        concurrency: usize,
    ) -> PluginSearchOutcome {
        let selected = self.select(requested);
        let limit = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for plugin in selected {
            let limit = Arc::clone(&limit);
            let keyword = keyword.to_string();
            let ext = ext.clone();
            let timeout = self.runtime.timeout;
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let name = plugin.name().to_string();
                (name, run_plugin(plugin, &keyword, &ext, timeout).await)
            });
        }

        let mut outcome = PluginSearchOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(results))) => {
                    outcome.succeeded += 1;
                    outcome.results.extend(results);
                }
                Ok((name, Err(e))) => {
                    warn!("Plugin '{name}' search failed: {e}");
                    outcome.failed += 1;
                }
                Err(e) => {
                    warn!("Plugin search task failed: {e}");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

/// Combined result of a multi-plugin search.
#[derive(Debug, Default)]
pub struct PluginSearchOutcome {
    pub results: Vec<SearchResult>,
    pub succeeded: usize,
    pub failed: usize,
}

async fn run_plugin(
    plugin: Arc<dyn AsyncSearchPlugin>,
    keyword: &str,
    ext: &Map<String, Value>,
    timeout: Duration,
) -> Result<Vec<SearchResult>> {
    let name = plugin.name().to_string();
    let results = tokio::time::timeout(timeout, plugin.search(keyword, ext))
        .await
        .map_err(|_| PansouError::Plugin {
            name: name.clone(),
            message: format!("timed out after {timeout:?}"),
        })??;

    debug!("Plugin '{name}' returned {} results", results.len());
    let prefix = format!("{name}-");
    Ok(results
        .into_iter()
        .map(|mut result| {
            if !result.unique_id.starts_with(&prefix) {
                result.unique_id = format!("{prefix}{}", result.unique_id);
            }
            result.origin = ResultOrigin::Plugin(name.clone());
            result
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPlugin {
        name: &'static str,
        priority: u32,
        delay: Duration,
    }

    #[async_trait]
    impl AsyncSearchPlugin for FixedPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        async fn search(
            &self,
            keyword: &str,
            _ext: &Map<String, Value>,
        ) -> Result<Vec<SearchResult>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![SearchResult {
                message_id: "1".to_string(),
                unique_id: "1".to_string(),
                channel: String::new(),
                datetime: "2024-01-01T00:00:00Z".to_string(),
                title: keyword.to_string(),
                content: String::new(),
                links: vec![],
                tags: vec![],
                images: vec![],
                origin: ResultOrigin::Channel("spoofed".to_string()),
            }])
        }
    }

    fn plugin(name: &'static str, priority: u32) -> Arc<dyn AsyncSearchPlugin> {
        Arc::new(FixedPlugin {
            name,
            priority,
            delay: Duration::ZERO,
        })
    }

    fn runtime() -> PluginRuntime {
        PluginRuntime {
            timeout: Duration::from_millis(100),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_registry_keeps_first_registration() {
        let registry = PluginRegistry::new();
        assert!(registry.register(plugin("labi", 1)));
        assert!(!registry.register(plugin("LABI", 2)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_registered_plugins()[0].priority(), 1);
    }

    #[test]
    fn test_filter_enabled() {
        let discovered = names(&["labi", "muou", "pansearch"]);
        let mut settings = PluginSettings::default();
        assert_eq!(filter_enabled(&discovered, &settings), discovered);

        settings.enabled_plugins = Some(names(&["Muou", " pansearch "]));
        assert_eq!(filter_enabled(&discovered, &settings), names(&["muou", "pansearch"]));
    }

    #[test]
    fn test_register_with_filter_orders_by_priority() {
        let registry = PluginRegistry::new();
        registry.register(plugin("zeta", 1));
        registry.register(plugin("alpha", 2));
        registry.register(plugin("skipped", 1));

        let mut manager = PluginManager::new(runtime());
        let added =
            manager.register_global_plugins_with_filter(&registry, &names(&["alpha", "zeta"]));

        assert_eq!(added, 2);
        assert_eq!(manager.plugin_names(), names(&["zeta", "alpha"]));
    }

    #[test]
    fn test_select() {
        let mut manager = PluginManager::new(runtime());
        manager.register_plugin(plugin("a", 1));
        manager.register_plugin(plugin("b", 1));

        assert_eq!(manager.select(None).len(), 2);
        let requested = names(&["B", "unknown"]);
        let selected = manager.select(Some(&requested));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "b");
    }

    #[tokio::test]
    async fn test_search_plugin_tags_results() {
        let manager = PluginManager::new(runtime());
        let results = manager
            .search_plugin(&plugin("labi", 1), "dune", &Map::new())
            .await
            .unwrap();

        assert_eq!(results[0].unique_id, "labi-1");
        assert_eq!(results[0].origin, ResultOrigin::Plugin("labi".to_string()));
    }

    #[tokio::test]
    async fn test_search_plugin_times_out() {
        let manager = PluginManager::new(runtime());
        let slow: Arc<dyn AsyncSearchPlugin> = Arc::new(FixedPlugin {
            name: "slow",
            priority: 1,
            delay: Duration::from_secs(5),
        });

        let err = manager.search_plugin(&slow, "x", &Map::new()).await.unwrap_err();
        assert!(matches!(err, PansouError::Plugin { ref name, .. } if name == "slow"));
    }

    #[tokio::test]
    async fn test_search_skips_failing_plugins() {
        let mut manager = PluginManager::new(runtime());
        manager.register_plugin(plugin("fast", 1));
        manager.register_plugin(Arc::new(FixedPlugin {
            name: "slow",
            priority: 2,
            delay: Duration::from_secs(5),
        }));

        let outcome = manager.search(None, "dune", &Map::new(), 4).await;
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].unique_id, "fast-1");
    }
}
