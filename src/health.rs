use crate::config::AppConfig;
use crate::dto::HealthResponse;
use crate::plugin::PluginManager;

/// Snapshot of service health. Plugin details are only reported when plugins
/// are enabled.
pub fn report(config: &AppConfig, plugins: &PluginManager) -> HealthResponse {
    let channels = config.default_channels().to_vec();
    let plugins_enabled = config.async_plugin_enabled();

    let (plugin_count, plugin_names) = if plugins_enabled {
        let names = plugins.plugin_names();
        (names.len(), Some(names))
    } else {
        (0, None)
    };

    HealthResponse {
        status: "ok".to_string(),
        plugins_enabled,
        channels_count: channels.len(),
        channels,
        plugin_count,
        plugins: plugin_names,
    }
}
