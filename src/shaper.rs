//! Mapping from the engine's internal response model to the external contract.
use crate::dto;
use crate::model;

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn shape_link(link: model::Link) -> dto::Link {
    dto::Link {
        kind: link.kind,
        url: link.url,
        password: link.password,
    }
}

fn shape_result(result: model::SearchResult) -> dto::SearchResult {
    dto::SearchResult {
        message_id: result.message_id,
        unique_id: result.unique_id,
        channel: result.channel,
        datetime: result.datetime,
        title: result.title,
        content: result.content,
        links: result.links.into_iter().map(shape_link).collect(),
        tags: non_empty(result.tags),
        images: non_empty(result.images),
    }
}

fn shape_merged_link(link: model::MergedLink) -> dto::MergedLink {
    dto::MergedLink {
        url: link.url,
        password: link.password,
        note: link.note,
        datetime: link.datetime,
        source: link.source.filter(|source| !source.is_empty()),
        images: non_empty(link.images),
    }
}

/// Convert an engine response into the stable external shape.
///
/// Absent collections become empty ones; internal-only fields are dropped.
pub fn shape_response(response: model::SearchResponse) -> dto::SearchResponse {
    let results = response
        .results
        .unwrap_or_default()
        .into_iter()
        .map(shape_result)
        .collect();

    let merged_by_type = response
        .merged_by_type
        .unwrap_or_default()
        .into_iter()
        .map(|(kind, links)| (kind, links.into_iter().map(shape_merged_link).collect()))
        .collect();

    dto::SearchResponse {
        total: response.total,
        results,
        merged_by_type,
    }
}
