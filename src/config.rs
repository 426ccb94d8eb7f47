use anyhow::{Context, Result, bail};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide configuration handle shared by the facade and the search engine.
pub type SharedConfig = Arc<RwLock<AppConfig>>;

/// Extra workers on top of one per channel and one per plugin.
const CONCURRENCY_HEADROOM: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub plugins: PluginSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub batch_write: BatchWriteSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_channels: Vec<String>,
    /// Explicit concurrency; when set, plugin discovery never recomputes it.
    pub concurrency: Option<usize>,
    #[serde(skip)]
    pub default_concurrency: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let default_channels = vec!["tgsearchers3".to_string()];
        let default_concurrency = default_channels.len() + CONCURRENCY_HEADROOM;
        Self {
            default_channels,
            concurrency: None,
            default_concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub async_plugin_enabled: bool,
    /// Allow-list applied to discovered plugins; `None` keeps every plugin.
    pub enabled_plugins: Option<Vec<String>>,
    #[serde(default = "default_plugin_timeout")]
    pub timeout_secs: u64,
}

fn default_plugin_timeout() -> u64 {
    30
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            async_plugin_enabled: true,
            enabled_plugins: None,
            timeout_secs: default_plugin_timeout(),
        }
    }
}

impl PluginSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub path: PathBuf,
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

fn default_max_memory_entries() -> usize {
    1000
}
fn default_ttl_minutes() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./cache"),
            max_memory_entries: default_max_memory_entries(),
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchWriteSettings {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_flush_interval() -> u64 {
    60
}
fn default_max_pending() -> usize {
    100
}

impl Default for BatchWriteSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            max_pending: default_max_pending(),
        }
    }
}

impl BatchWriteSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            proxy: None,
            user_agent: concat!("pansou/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// How long the deferred cache wiring waits for the engine's cache.
    pub cache_ready_timeout_ms: u64,
    /// Budget shared by both shutdown phases.
    pub shutdown_timeout_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            cache_ready_timeout_ms: 5000,
            shutdown_timeout_secs: 10,
        }
    }
}

impl LifecycleSettings {
    pub fn cache_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_ready_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl AppConfig {
    /// Load from `explicit` or the first config file found, then apply the
    /// process environment on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_path()?,
        };

        let mut config = if let Some(path) = config_path {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Invalid TOML")?;
        config.refresh_default_concurrency(0);
        Ok(config)
    }

    fn find_config_path() -> Result<Option<PathBuf>> {
        if let Some(xdg_config) = dirs::config_dir() {
            let xdg_path = xdg_config.join("pansou/config.toml");
            if xdg_path.exists() {
                return Ok(Some(xdg_path));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let home_path = home.join(".pansou.toml");
            if home_path.exists() {
                return Ok(Some(home_path));
            }
        }

        let current_path = Path::new(".pansou.toml");
        if current_path.exists() {
            return Ok(Some(current_path.to_path_buf()));
        }

        Ok(None)
    }

    /// Apply environment overrides through `lookup` so tests can supply a fake environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(channels) = lookup("CHANNELS") {
            self.search.default_channels = split_list(&channels);
        }
        if let Some(value) = lookup("CONCURRENCY") {
            let concurrency = parse_number::<usize>("CONCURRENCY", &value)?;
            self.search.concurrency = Some(concurrency);
        }
        if let Some(value) = lookup("ASYNC_PLUGIN_ENABLED") {
            self.plugins.async_plugin_enabled = parse_bool("ASYNC_PLUGIN_ENABLED", &value)?;
        }
        if let Some(value) = lookup("ENABLED_PLUGINS") {
            self.plugins.enabled_plugins = Some(split_list(&value));
        }
        if let Some(value) = lookup("PLUGIN_TIMEOUT") {
            self.plugins.timeout_secs = parse_number("PLUGIN_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("CACHE_ENABLED") {
            self.cache.enabled = parse_bool("CACHE_ENABLED", &value)?;
        }
        if let Some(value) = lookup("CACHE_PATH") {
            self.cache.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("CACHE_MAX_SIZE") {
            self.cache.max_memory_entries = parse_number("CACHE_MAX_SIZE", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL") {
            self.cache.ttl_minutes = parse_number("CACHE_TTL", &value)?;
        }
        if let Some(value) = lookup("PROXY") {
            let value = value.trim().to_string();
            self.http.proxy = if value.is_empty() { None } else { Some(value) };
        }

        self.refresh_default_concurrency(0);
        Ok(())
    }

    pub fn default_channels(&self) -> &[String] {
        &self.search.default_channels
    }

    pub fn async_plugin_enabled(&self) -> bool {
        self.plugins.async_plugin_enabled
    }

    pub fn default_concurrency(&self) -> usize {
        self.search.default_concurrency
    }

    /// Recompute the fallback concurrency once the number of active plugins is known.
    pub fn update_default_concurrency(&mut self, plugin_count: usize) {
        self.refresh_default_concurrency(plugin_count);
    }

    fn refresh_default_concurrency(&mut self, plugin_count: usize) {
        self.search.default_concurrency = match self.search.concurrency {
            Some(explicit) => explicit.max(1),
            None => {
                let sources = self.search.default_channels.len() + plugin_count;
                (sources + CONCURRENCY_HEADROOM).max(1)
            }
        };
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key}: expected a boolean, got '{other}'"),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{key}: expected a number, got '{}'", value.trim()))
}
