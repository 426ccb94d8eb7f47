//! Result post-processing: de-duplication, cloud type filtering and
//! grouping links by type.
use crate::model::{MergedLink, MergedLinks, ResultType, SearchResponse, SearchResult};
use std::collections::HashSet;

/// Drop repeated `unique_id`s (first occurrence wins) and order newest first.
pub fn dedupe_and_sort(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut unique: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| seen.insert(r.unique_id.clone()))
        .collect();
    unique.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    unique
}

/// Keep only links of the requested types. Results left without links are dropped.
pub fn filter_cloud_types(
    results: Vec<SearchResult>,
    cloud_types: Option<&[String]>,
) -> Vec<SearchResult> {
    let Some(types) = cloud_types.filter(|t| !t.is_empty()) else {
        return results;
    };

    results
        .into_iter()
        .filter_map(|mut result| {
            result
                .links
                .retain(|link| types.iter().any(|t| t.trim().eq_ignore_ascii_case(&link.kind)));
            (!result.links.is_empty()).then_some(result)
        })
        .collect()
}

pub fn merge_by_type(results: &[SearchResult]) -> MergedLinks {
    let mut merged = MergedLinks::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for result in results {
        let source = result.origin.source_tag();
        for link in &result.links {
            if !seen.insert((link.kind.clone(), link.url.clone())) {
                continue;
            }
            merged.entry(link.kind.clone()).or_default().push(MergedLink {
                url: link.url.clone(),
                password: link.password.clone(),
                note: result.title.clone(),
                datetime: result.datetime.clone(),
                source: Some(source.clone()),
                images: result.images.clone(),
            });
        }
    }
    merged
}

/// Assemble the engine response for the requested result type. Expects
/// results already de-duplicated, ordered and filtered.
pub fn build_response(
    results: Vec<SearchResult>,
    result_type: Option<&ResultType>,
) -> SearchResponse {
    match result_type {
        Some(ResultType::Results) => SearchResponse {
            total: results.len(),
            results: Some(results),
            merged_by_type: None,
        },
        Some(ResultType::MergedByType) | Some(ResultType::Merge) => {
            let merged = merge_by_type(&results);
            SearchResponse {
                total: merged.values().map(Vec::len).sum(),
                results: None,
                merged_by_type: Some(merged),
            }
        }
        _ => {
            let merged = merge_by_type(&results);
            SearchResponse {
                total: results.len(),
                results: Some(results),
                merged_by_type: Some(merged),
            }
        }
    }
}
