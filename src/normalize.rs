//! Request normalization applied before a search reaches the engine.
use crate::config::AppConfig;
use crate::model::{ResultType, SearchRequest, SourceType};
use log::warn;

fn is_blank(list: &Option<Vec<String>>) -> bool {
    match list {
        None => true,
        Some(items) => items.is_empty(),
    }
}

/// Fill defaults and apply the channel/plugin exclusion rules.
///
/// - missing channels fall back to the configured defaults
/// - a missing result type or the legacy `merge` becomes `merged_by_type`
/// - a missing source type becomes `all`
/// - `tg` drops plugins, `plugin` drops channels, `all` turns an empty plugin
///   list into "no plugin list"
///
/// Unrecognised source types are passed through untouched.
pub fn normalize(mut req: SearchRequest, config: &AppConfig) -> SearchRequest {
    if is_blank(&req.channels) {
        req.channels = Some(config.default_channels().to_vec());
    }

    req.result_type = Some(match req.result_type.take() {
        None | Some(ResultType::Merge) => ResultType::MergedByType,
        Some(ResultType::Other(value)) if value.is_empty() => ResultType::MergedByType,
        Some(other) => other,
    });

    let source_type = match req.source_type.take() {
        None => SourceType::All,
        Some(SourceType::Other(value)) if value.is_empty() => SourceType::All,
        Some(other) => other,
    };

    match &source_type {
        SourceType::Telegram => req.plugins = None,
        SourceType::Plugin => req.channels = None,
        SourceType::All => {
            if is_blank(&req.plugins) {
                req.plugins = None;
            }
        }
        SourceType::Other(value) => {
            warn!("Unrecognised source type '{value}' passed to the engine unchanged");
        }
    }
    req.source_type = Some(source_type);

    req
}
