//! Deterministic cache keys for per-source search results
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn build_key(scope: &str, keyword: &str, sources: &[String], extra: &str) -> String {
    let mut sources: Vec<&str> = sources.iter().map(|s| s.trim()).collect();
    sources.sort_unstable();
    sources.dedup();

    let keyword = keyword.trim().to_lowercase();
    if extra.is_empty() {
        format!("{scope}:{keyword}:{}", sources.join(","))
    } else {
        format!("{scope}:{keyword}:{}:{extra}", sources.join(","))
    }
}

/// Key for channel results. Channel order does not matter.
pub fn channel_cache_key(keyword: &str, channels: &[String]) -> String {
    build_key("tg", keyword, channels, "")
}

/// Key for plugin results. `ext` takes part because plugins may read it.
pub fn plugin_cache_key(
    keyword: &str,
    plugins: &[String],
    ext: Option<&Map<String, Value>>,
) -> String {
    let extra = match ext {
        Some(ext) if !ext.is_empty() => Value::Object(ext.clone()).to_string(),
        _ => String::new(),
    };
    build_key("plugin", keyword, plugins, &extra)
}

/// File-name-safe SHA-256 hex digest of a cache key.
pub fn file_stem(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}
