//! Author freshness records
//!
//! One document per feed in `authors`. Each upsert reads the existing record,
//! adds the batch size to `articleCount`, unions the categories and merges
//! the result back, leaving fields written by other tools untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

use crate::dedup::author_id;
use crate::error::Result;
use crate::metrics;
use crate::schemas::{parse_timestamp, Article, AuthorRecord, UpsertAuthorRequest, UpsertAuthorResponse, UpsertStatus};
use crate::storage::{collections, to_document, Document, DocumentStore, WriteMode};

/// Destination for per-feed author updates
#[async_trait]
pub trait AuthorSink: Send + Sync {
    async fn upsert_author(&self, request: UpsertAuthorRequest) -> Result<UpsertAuthorResponse>;
}

pub struct AuthorUpserter {
    store: Arc<dyn DocumentStore>,
}

/// Fields carried over from the stored record
struct ExistingAuthor {
    article_count: u64,
    categories: Vec<String>,
}

impl ExistingAuthor {
    /// Reads the stored record leniently; records written by import tooling
    /// may lack fields or use other shapes
    fn from_document(doc: &Document) -> Self {
        Self {
            article_count: doc.get("articleCount").and_then(Value::as_u64).unwrap_or(0),
            categories: doc
                .get("categories")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

impl AuthorUpserter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn upsert(&self, request: &UpsertAuthorRequest) -> Result<UpsertAuthorResponse> {
        if request.articles.is_empty() {
            return Ok(UpsertAuthorResponse::skipped("No articles to process"));
        }

        let id = author_id(&request.feed_url);
        let now = Utc::now();
        let name = author_name(request);

        let existing = self
            .store
            .get(collections::AUTHORS, &id)
            .await?
            .map(|doc| ExistingAuthor::from_document(&doc));

        let status = if existing.is_some() {
            UpsertStatus::Updated
        } else {
            UpsertStatus::Created
        };
        let existing = existing.unwrap_or(ExistingAuthor {
            article_count: 0,
            categories: vec![],
        });

        let categories: BTreeSet<String> = existing
            .categories
            .into_iter()
            .chain(request.articles.iter().flat_map(|a| a.categories.iter().cloned()))
            .filter(|c| !c.is_empty())
            .collect();

        let record = AuthorRecord {
            name: name.clone(),
            feed_url: request.feed_url.clone(),
            website_url: website_url(request),
            last_published: newest_published(&request.articles).unwrap_or(now),
            last_fetched: now,
            article_count: existing.article_count + request.articles.len() as u64,
            categories: categories.into_iter().collect(),
            status: "active".to_string(),
            consecutive_errors: 0,
            feed_description: request
                .feed_metadata
                .as_ref()
                .and_then(|m| m.description.clone()),
            created_at: (status == UpsertStatus::Created).then_some(now),
            updated_at: now,
        };

        self.store
            .set(collections::AUTHORS, &id, to_document(&record)?, WriteMode::Merge)
            .await?;

        info!(author_id = %id, author_name = %name, status = %status, "Author upserted");

        Ok(UpsertAuthorResponse {
            author_id: Some(id),
            author_name: Some(name),
            status,
            error: None,
        })
    }
}

#[async_trait]
impl AuthorSink for AuthorUpserter {
    #[instrument(skip(self, request), fields(feed_url = %request.feed_url, articles = request.articles.len()))]
    async fn upsert_author(&self, request: UpsertAuthorRequest) -> Result<UpsertAuthorResponse> {
        let response = match self.upsert(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to upsert author");
                UpsertAuthorResponse::failed(e.to_string())
            }
        };
        metrics::record_author_upsert(response.status.as_str());
        Ok(response)
    }
}

/// Newest parseable `published_at` in the batch
fn newest_published(articles: &[Article]) -> Option<DateTime<Utc>> {
    articles
        .iter()
        .filter_map(|a| parse_timestamp(&a.published_at))
        .max()
}

/// Metadata title, metadata author, first article author, then feed host
fn author_name(request: &UpsertAuthorRequest) -> String {
    let from_metadata = request.feed_metadata.as_ref().and_then(|m| {
        m.title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| m.author.clone().filter(|a| !a.is_empty()))
    });

    from_metadata
        .or_else(|| {
            request
                .articles
                .iter()
                .find_map(|a| a.author.clone().filter(|a| !a.is_empty()))
        })
        .unwrap_or_else(|| {
            Url::parse(&request.feed_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.replace("www.", "")))
                .unwrap_or_else(|| request.feed_url.clone())
        })
}

/// Metadata link, else `scheme://host` of the feed URL
fn website_url(request: &UpsertAuthorRequest) -> String {
    if let Some(link) = request
        .feed_metadata
        .as_ref()
        .and_then(|m| m.link.clone())
        .filter(|l| !l.is_empty())
    {
        return link;
    }

    match Url::parse(&request.feed_url) {
        Ok(url) => match url.host_str() {
            Some(host) => format!("{}://{}", url.scheme(), host),
            None => request.feed_url.clone(),
        },
        Err(_) => request.feed_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{FeedMetadata, RawArticle, Source};
    use crate::storage::MemoryDocumentStore;

    const FEED: &str = "https://www.example.com/feed.xml";

    fn articles(n: usize, category: &str, published_at: &str) -> Vec<Article> {
        let source = Source::new("Example", FEED, "tech");
        (0..n)
            .map(|i| {
                let mut article = Article::from_raw(
                    &RawArticle {
                        url: Some(format!("https://www.example.com/{i}")),
                        published_at: Some(published_at.to_string()),
                        ..Default::default()
                    },
                    &source,
                );
                article.categories = vec![category.to_string()];
                article
            })
            .collect()
    }

    fn request(articles: Vec<Article>, feed_metadata: Option<FeedMetadata>) -> UpsertAuthorRequest {
        UpsertAuthorRequest {
            feed_url: FEED.to_string(),
            articles,
            feed_metadata,
        }
    }

    #[tokio::test]
    async fn test_counter_accumulates_and_categories_union() {
        let memory = Arc::new(MemoryDocumentStore::new());
        let upserter = AuthorUpserter::new(memory.clone());

        let first = upserter
            .upsert_author(request(articles(5, "ai", "2024-01-10T08:00:00Z"), None))
            .await
            .unwrap();
        assert_eq!(first.status, UpsertStatus::Created);

        let second = upserter
            .upsert_author(request(articles(3, "rust", "2024-01-12T08:00:00Z"), None))
            .await
            .unwrap();
        assert_eq!(second.status, UpsertStatus::Updated);
        assert_eq!(second.author_id, first.author_id);

        let doc = memory
            .get(collections::AUTHORS, &author_id(FEED))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["articleCount"], 8);
        assert_eq!(doc["categories"], serde_json::json!(["ai", "rust"]));
        assert_eq!(doc["consecutiveErrors"], 0);
        assert_eq!(doc["status"], "active");
        assert!(doc["createdAt"].is_string());
        assert!(doc["lastPublished"].as_str().unwrap().starts_with("2024-01-12T08:00:00"));
    }

    #[tokio::test]
    async fn test_update_keeps_foreign_created_at() {
        let memory = Arc::new(MemoryDocumentStore::new());
        let mut imported = Document::new();
        imported.insert("name".into(), serde_json::json!("Imported Feed"));
        imported.insert("articleCount".into(), serde_json::json!(2));
        imported.insert("createdAt".into(), serde_json::json!({ "_seconds": 1700000000 }));
        memory
            .set(collections::AUTHORS, &author_id(FEED), imported, WriteMode::Overwrite)
            .await
            .unwrap();

        let upserter = AuthorUpserter::new(memory.clone());
        let response = upserter
            .upsert_author(request(articles(1, "ai", "2024-01-10T08:00:00Z"), None))
            .await
            .unwrap();
        assert_eq!(response.status, UpsertStatus::Updated);

        let doc = memory
            .get(collections::AUTHORS, &author_id(FEED))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["createdAt"], serde_json::json!({ "_seconds": 1700000000 }));
        assert_eq!(doc["articleCount"], 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let memory = Arc::new(MemoryDocumentStore::new());
        let upserter = AuthorUpserter::new(memory.clone());

        let response = upserter.upsert_author(request(vec![], None)).await.unwrap();

        assert_eq!(response.status, UpsertStatus::Skipped);
        assert!(response.author_id.is_none());
        assert_eq!(memory.count(collections::AUTHORS), 0);
    }

    #[test]
    fn test_name_and_website_fallbacks() {
        let bare = request(articles(1, "ai", ""), None);
        assert_eq!(author_name(&bare), "example.com");
        assert_eq!(website_url(&bare), "https://www.example.com");

        let metadata = FeedMetadata {
            title: None,
            author: Some("Jane Doe".to_string()),
            link: Some("https://jane.example.com".to_string()),
            description: None,
        };
        let with_metadata = request(articles(1, "ai", ""), Some(metadata));
        assert_eq!(author_name(&with_metadata), "Jane Doe");
        assert_eq!(website_url(&with_metadata), "https://jane.example.com");

        let mut by_article = articles(1, "ai", "");
        by_article[0].author = Some("Article Author".to_string());
        assert_eq!(author_name(&request(by_article, None)), "Article Author");
    }

    #[test]
    fn test_newest_published_ignores_unparseable() {
        let mut batch = articles(2, "ai", "not a date");
        batch[1].published_at = "Mon, 15 Jan 2024 10:30:00 GMT".to_string();
        let newest = newest_published(&batch).unwrap();
        assert_eq!(newest.to_rfc3339(), "2024-01-15T10:30:00+00:00");

        assert!(newest_published(&articles(2, "ai", "")).is_none());
    }
}
