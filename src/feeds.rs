//! RSS/Atom feed fetching
//!
//! `FeedFetcher` is the seam the harvester and the HTTP API call through.
//! `HttpFeedFetcher` downloads with the retrying client and parses with
//! `feed-rs`, which handles RSS 0.9x/1.0/2.0, Atom and JSON Feed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use feed_rs::model::{Entry, Feed};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::http_client::ResilientHttpClient;
use crate::schemas::{format_timestamp, FeedMetadata, FeedRequest, FeedResponse, RawArticle};

/// Max chars kept in `content_snippet`
const SNIPPET_LEN: usize = 300;

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse>;
}

pub struct HttpFeedFetcher {
    client: ResilientHttpClient,
}

impl HttpFeedFetcher {
    pub fn new(client: ResilientHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    #[instrument(skip(self, request), fields(feed_url = %request.feed_url, request_id = ?request.request_id))]
    async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse> {
        let response = self.client.get(&request.feed_url).await?;
        let bytes = response.bytes().await?;

        let parsed = parse_feed(&bytes, request.time_window_hours, request.max_items, Utc::now())?;
        debug!(articles = parsed.article_count, "Feed parsed");
        Ok(parsed)
    }
}

/// Parses a feed body into raw articles.
///
/// Entries published before `now - time_window_hours` are dropped; entries
/// with no date are kept and stamped `now`. At most `max_items` are returned,
/// in feed order. A window reaching past the representable range keeps every
/// dated entry.
pub fn parse_feed(body: &[u8], time_window_hours: u32, max_items: u32, now: DateTime<Utc>) -> Result<FeedResponse> {
    let feed = feed_rs::parser::parse(body)?;
    let cutoff = Duration::try_hours(i64::from(time_window_hours))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let metadata = feed_metadata(&feed);

    let articles: Vec<RawArticle> = feed
        .entries
        .into_iter()
        .filter_map(|entry| raw_article(entry, cutoff, now))
        .take(max_items as usize)
        .collect();

    Ok(FeedResponse::new(articles, Some(metadata)))
}

fn raw_article(entry: Entry, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Option<RawArticle> {
    let url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

    let published = entry.published.or(entry.updated);
    if matches!(published, Some(date) if date < cutoff) {
        return None;
    }

    let summary = entry.summary.map(|t| t.content);
    let content_snippet = summary
        .as_deref()
        .map(|s| s.chars().take(SNIPPET_LEN).collect::<String>());

    Some(RawArticle {
        title: entry.title.map(|t| t.content),
        url: Some(url),
        published_at: Some(format_timestamp(&published.unwrap_or(now))),
        summary,
        raw_content: entry.content.and_then(|c| c.body),
        content_snippet,
        author: entry.authors.first().map(|p| p.name.clone()),
        categories: entry
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term))
            .collect(),
    })
}

fn feed_metadata(feed: &Feed) -> FeedMetadata {
    FeedMetadata {
        title: feed.title.as_ref().map(|t| t.content.clone()),
        link: feed.links.first().map(|l| l.href.clone()),
        description: feed.description.as_ref().map(|t| t.content.clone()),
        author: feed.authors.first().map(|p| p.name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://blog.example.com</link>
    <description>Notes from the example team</description>
    {items}
  </channel>
</rss>"#
        )
    }

    fn item(title: &str, link: &str, date: Option<DateTime<Utc>>) -> String {
        let pub_date = date
            .map(|d| format!("<pubDate>{}</pubDate>", d.to_rfc2822()))
            .unwrap_or_default();
        format!(
            "<item><title>{title}</title><link>{link}</link>{pub_date}<description>About {title}</description><category>ai</category></item>"
        )
    }

    #[test]
    fn test_parse_applies_time_window() {
        let now = Utc::now();
        let body = rss(&[
            item("Fresh", "https://blog.example.com/fresh", Some(now - Duration::hours(2))),
            item("Old", "https://blog.example.com/old", Some(now - Duration::hours(48))),
            item("Undated", "https://blog.example.com/undated", None),
        ]
        .join("\n"));

        let response = parse_feed(body.as_bytes(), 24, 50, now).unwrap();

        assert_eq!(response.article_count, 2);
        assert_eq!(response.articles[0].title.as_deref(), Some("Fresh"));
        assert_eq!(response.articles[1].published_at, Some(format_timestamp(&now)));
        assert_eq!(response.articles[0].categories, vec!["ai".to_string()]);

        let metadata = response.feed_metadata.unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Example Blog"));
        assert_eq!(metadata.description.as_deref(), Some("Notes from the example team"));
    }

    #[test]
    fn test_parse_truncates_to_max_items() {
        let now = Utc::now();
        let items: Vec<String> = (0..10)
            .map(|i| item(&format!("Post {i}"), &format!("https://blog.example.com/{i}"), Some(now)))
            .collect();

        let response = parse_feed(rss(&items.join("\n")).as_bytes(), 24, 3, now).unwrap();
        assert_eq!(response.article_count, 3);
        assert_eq!(response.articles[2].url.as_deref(), Some("https://blog.example.com/2"));
    }

    #[test]
    fn test_parse_with_unbounded_window_keeps_old_entries() {
        let now = Utc::now();
        let body = rss(&[
            item("Ancient", "https://blog.example.com/ancient", Some(now - Duration::days(3650))),
            item("Fresh", "https://blog.example.com/fresh", Some(now)),
        ]
        .join("\n"));

        let response = parse_feed(body.as_bytes(), u32::MAX, 50, now).unwrap();
        assert_eq!(response.article_count, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_feed(b"this is not a feed", 24, 50, Utc::now()).is_err());
    }
}
