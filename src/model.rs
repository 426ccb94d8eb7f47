//! Engine-side request and result model.
//!
//! These types are what the search engine consumes, caches and produces.
//! They are free to carry bookkeeping the external contract in [`crate::dto`]
//! never exposes (for example [`ResultOrigin`]).
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Requested response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResultType {
    All,
    Results,
    MergedByType,
    /// Legacy spelling of [`ResultType::MergedByType`].
    Merge,
    Other(String),
}

impl ResultType {
    pub fn as_str(&self) -> &str {
        match self {
            ResultType::All => "all",
            ResultType::Results => "results",
            ResultType::MergedByType => "merged_by_type",
            ResultType::Merge => "merge",
            ResultType::Other(value) => value,
        }
    }
}

impl From<&str> for ResultType {
    fn from(value: &str) -> Self {
        match value {
            "all" => ResultType::All,
            "results" => ResultType::Results,
            "merged_by_type" => ResultType::MergedByType,
            "merge" => ResultType::Merge,
            other => ResultType::Other(other.to_string()),
        }
    }
}

impl From<String> for ResultType {
    fn from(value: String) -> Self {
        ResultType::from(value.as_str())
    }
}

impl From<ResultType> for String {
    fn from(value: ResultType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which kinds of sources a search fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    All,
    Telegram,
    Plugin,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::All => "all",
            SourceType::Telegram => "tg",
            SourceType::Plugin => "plugin",
            SourceType::Other(value) => value,
        }
    }

    pub fn includes_channels(&self) -> bool {
        matches!(self, SourceType::All | SourceType::Telegram)
    }

    pub fn includes_plugins(&self) -> bool {
        matches!(self, SourceType::All | SourceType::Plugin)
    }
}

impl From<&str> for SourceType {
    fn from(value: &str) -> Self {
        match value {
            "all" => SourceType::All,
            "tg" => SourceType::Telegram,
            "plugin" => SourceType::Plugin,
            other => SourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        SourceType::from(value.as_str())
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Empty strings on the wire mean "not provided".
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|value| !value.is_empty()).map(T::from))
}

/// Inbound search request, as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(rename = "kw", alias = "keyword")]
    pub keyword: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,

    #[serde(
        rename = "conc",
        alias = "concurrency",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrency: Option<usize>,

    #[serde(rename = "refresh", alias = "force_refresh", default)]
    pub force_refresh: bool,

    #[serde(
        rename = "res",
        alias = "result_type",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_type: Option<ResultType>,

    #[serde(
        rename = "src",
        alias = "source_type",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_type: Option<SourceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Self::default()
        }
    }
}

/// Where a result came from. Internal bookkeeping only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ResultOrigin {
    Channel(String),
    Plugin(String),
}

impl ResultOrigin {
    /// Provenance tag attached to merged links.
    pub fn source_tag(&self) -> String {
        match self {
            ResultOrigin::Channel(channel) => format!("tg:{channel}"),
            ResultOrigin::Plugin(name) => format!("plugin:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub message_id: String,
    pub unique_id: String,
    pub channel: String,
    /// RFC 3339 timestamp; lexical order matches chronological order.
    pub datetime: String,
    pub title: String,
    pub content: String,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub origin: ResultOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLink {
    pub url: String,
    pub password: String,
    pub note: String,
    pub datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Links grouped by link type, ordered by type name.
pub type MergedLinks = BTreeMap<String, Vec<MergedLink>>;

/// Engine response. Collections the caller did not ask for stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Option<Vec<SearchResult>>,
    pub merged_by_type: Option<MergedLinks>,
}
