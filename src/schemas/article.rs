//! Article Schemas
//!
//! `RawArticle` is what the feed fetcher returns, `Article` is the normalized
//! form handed to storage, and `StoredArticle` is the persisted document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::timestamp;
use super::source::Source;

/// Article as returned by the feed fetcher
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawArticle {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub content_snippet: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Feed-level metadata used for author tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Normalized article, tagged with its originating source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl Article {
    /// Normalizes a fetched article for the given source
    pub fn from_raw(raw: &RawArticle, source: &Source) -> Self {
        Self {
            title: raw.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            url: raw.url.clone().unwrap_or_default(),
            source_id: source.source_id.clone(),
            source_name: source.name.clone(),
            category: Some(source.category.clone()),
            published_at: raw.published_at.clone().unwrap_or_default(),
            summary: raw.summary.clone(),
            content: raw.raw_content.clone().or_else(|| raw.content_snippet.clone()),
            author: raw.author.clone(),
            categories: raw.categories.clone(),
            relevance_score: None,
        }
    }
}

/// Persisted article document (collection `articles`, keyed by URL hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredArticle {
    #[serde(flatten)]
    pub article: Article,
    #[serde(with = "timestamp")]
    pub stored_at: DateTime<Utc>,
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            source_id: "hacker-news".to_string(),
            name: "Hacker News".to_string(),
            url: "https://news.ycombinator.com/rss".to_string(),
            category: "tech".to_string(),
        }
    }

    #[test]
    fn test_from_raw_defaults() {
        let article = Article::from_raw(&RawArticle::default(), &source());

        assert_eq!(article.title, "Untitled");
        assert_eq!(article.url, "");
        assert_eq!(article.source_id, "hacker-news");
        assert_eq!(article.category.as_deref(), Some("tech"));
        assert!(article.content.is_none());
    }

    #[test]
    fn test_content_prefers_raw_content() {
        let raw = RawArticle {
            raw_content: Some("full body".to_string()),
            content_snippet: Some("snippet".to_string()),
            ..Default::default()
        };
        assert_eq!(Article::from_raw(&raw, &source()).content.as_deref(), Some("full body"));

        let raw = RawArticle {
            content_snippet: Some("snippet".to_string()),
            ..Default::default()
        };
        assert_eq!(Article::from_raw(&raw, &source()).content.as_deref(), Some("snippet"));
    }

    #[test]
    fn test_stored_article_is_flat() {
        let stored = StoredArticle {
            article: Article::from_raw(
                &RawArticle {
                    url: Some("https://example.com/a".to_string()),
                    ..Default::default()
                },
                &source(),
            ),
            stored_at: Utc::now(),
            run_id: "run-123".to_string(),
        };

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["url"], "https://example.com/a");
        assert_eq!(json["run_id"], "run-123");
        assert!(json.get("article").is_none());
    }
}
