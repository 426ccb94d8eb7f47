//! Telegram channel source.
//!
//! Searches a public channel through its web preview (`t.me/s/<channel>`)
//! and turns each message carrying cloud-drive links into a [`SearchResult`].
use crate::error::{PansouError, Result};
use crate::http::http_client;
use crate::model::{ResultOrigin, SearchResult};
use crate::search::links::extract_links;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, trace};
use scraper::{ElementRef, Html, Selector};

pub const TELEGRAM_PREVIEW_URL: &str = "https://t.me/s";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn search_channel(&self, channel: &str, keyword: &str) -> Result<Vec<SearchResult>>;
}

pub struct TelegramChannelSource {
    base_url: String,
}

impl TelegramChannelSource {
    pub fn new() -> Self {
        Self::with_base_url(TELEGRAM_PREVIEW_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for TelegramChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSource for TelegramChannelSource {
    async fn search_channel(&self, channel: &str, keyword: &str) -> Result<Vec<SearchResult>> {
        let url = format!("{}/{}", self.base_url, channel);
        trace!("Fetching {url} for '{keyword}'");

        let html = http_client()
            .get(&url)
            .query(&[("q", keyword)])
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_channel_page(channel, &html)
    }
}

fn selector(channel: &str, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PansouError::Channel {
        channel: channel.to_string(),
        message: format!("invalid selector '{css}': {e:?}"),
    })
}

fn normalize_datetime(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|_| raw.to_string())
}

fn background_image(style: &str) -> Option<String> {
    let start = style.find("url(")? + 4;
    let rest = &style[start..];
    let end = rest.find(')')?;
    let url = rest[..end].trim_matches(|c| c == '\'' || c == '"');
    (!url.is_empty()).then(|| url.to_string())
}

fn message_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join("\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a channel preview page. Messages without cloud-drive links are skipped.
pub fn parse_channel_page(channel: &str, html: &str) -> Result<Vec<SearchResult>> {
    let document = Html::parse_document(html);

    let message_sel = selector(channel, ".tgme_widget_message[data-post]")?;
    let time_sel = selector(channel, "time[datetime]")?;
    let text_sel = selector(channel, ".tgme_widget_message_text")?;
    let anchor_sel = selector(channel, "a[href]")?;
    let photo_sel = selector(channel, ".tgme_widget_message_photo_wrap")?;

    let mut results = Vec::new();
    for message in document.select(&message_sel) {
        let Some(post) = message.value().attr("data-post") else {
            continue;
        };
        let message_id = post.rsplit('/').next().unwrap_or(post).to_string();

        let Some(text_el) = message.select(&text_sel).next() else {
            continue;
        };
        let content = message_text(text_el);

        let mut hrefs = Vec::new();
        let mut tags = Vec::new();
        for anchor in text_el.select(&anchor_sel) {
            let label = anchor.text().collect::<String>();
            if let Some(tag) = label.trim().strip_prefix('#') {
                if !tag.is_empty() {
                    tags.push(tag.to_string());
                }
                continue;
            }
            if let Some(href) = anchor.value().attr("href") {
                hrefs.push(href.to_string());
            }
        }

        let links = extract_links(&content, &hrefs);
        if links.is_empty() {
            continue;
        }

        let datetime = message
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .map(normalize_datetime)
            .unwrap_or_default();

        let images = message
            .select(&photo_sel)
            .filter_map(|photo| photo.value().attr("style").and_then(background_image))
            .collect();

        let title = content.lines().next().unwrap_or_default().to_string();

        results.push(SearchResult {
            unique_id: format!("{channel}-{message_id}"),
            message_id,
            channel: channel.to_string(),
            datetime,
            title,
            content,
            links,
            tags,
            images,
            origin: ResultOrigin::Channel(channel.to_string()),
        });
    }

    debug!("Channel '{channel}' page yielded {} results", results.len());
    Ok(results)
}
