//! External response contract.
//!
//! Collections here are never `null` on the wire: `results` is always an
//! array and `merged_by_type` is always an object.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type MergedLinks = BTreeMap<String, Vec<MergedLink>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<SearchResult>,
    pub merged_by_type: MergedLinks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub message_id: String,
    /// Globally unique across channels and plugins.
    pub unique_id: String,
    pub channel: String,
    pub datetime: String,
    pub title: String,
    pub content: String,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLink {
    pub url: String,
    pub password: String,
    pub note: String,
    pub datetime: String,
    /// `tg:<channel>` or `plugin:<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub plugins_enabled: bool,
    pub channels: Vec<String>,
    pub channels_count: usize,
    pub plugin_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response_serializes_collections() {
        let json = serde_json::to_value(SearchResponse::default()).unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["results"].as_array().unwrap().is_empty());
        assert!(json["merged_by_type"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let link = MergedLink {
            url: "https://pan.quark.cn/s/abc".to_string(),
            password: String::new(),
            note: "note".to_string(),
            datetime: "2024-01-01T00:00:00Z".to_string(),
            source: None,
            images: None,
        };
        let json = serde_json::to_value(link).unwrap();
        assert!(json.get("source").is_none());
        assert!(json.get("images").is_none());
        assert_eq!(json["password"], "");
    }
}
