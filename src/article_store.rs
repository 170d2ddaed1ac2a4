//! Article persistence
//!
//! Deduplicates a batch by URL, prepares one document per article and writes
//! them in chunks of at most `MAX_BATCH_WRITES`, each chunk committed as its
//! own batch. Documents are merge-upserted at `sha256(url)`, so storing the
//! same URL again updates the existing document instead of duplicating it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

use crate::dedup::{article_id, dedup_by_url};
use crate::error::{IngestionError, Result};
use crate::metrics;
use crate::schemas::{Article, StorageStats, StoreArticlesRequest, StoreArticlesResponse, StoredArticle};
use crate::storage::{collections, to_document, Document, DocumentStore, WriteBatch, WriteMode, MAX_BATCH_WRITES};

/// Destination for harvested articles
#[async_trait]
pub trait ArticleSink: Send + Sync {
    async fn store_articles(&self, request: StoreArticlesRequest) -> Result<StoreArticlesResponse>;
}

pub struct ArticleStore {
    store: Arc<dyn DocumentStore>,
    chunk_size: usize,
}

struct PreparedArticle {
    id: String,
    url: String,
    document: Document,
}

impl ArticleStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            chunk_size: MAX_BATCH_WRITES,
        }
    }

    /// Overrides the commit chunk size (clamped to the batch cap)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_BATCH_WRITES);
        self
    }

    fn prepare(article: Article, run_id: &str) -> Result<PreparedArticle> {
        validate_article_url(&article.url)?;

        let url = article.url.clone();
        let stored = StoredArticle {
            article,
            stored_at: Utc::now(),
            run_id: run_id.to_string(),
        };

        Ok(PreparedArticle {
            id: article_id(&url),
            url,
            document: to_document(&stored)?,
        })
    }

    async fn commit_chunk(&self, chunk: Vec<PreparedArticle>) -> Result<()> {
        let mut batch = WriteBatch::new();
        for prepared in chunk {
            batch.set(collections::ARTICLES, prepared.id, prepared.document, WriteMode::Merge)?;
        }
        self.store.commit(batch).await
    }
}

/// Only absolute http(s) URLs are stored
fn validate_article_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw).map_err(|e| IngestionError::ValidationError(format!("invalid article url {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(IngestionError::ValidationError(format!(
            "unsupported url scheme {scheme:?} for {raw}"
        ))),
    }
}

#[async_trait]
impl ArticleSink for ArticleStore {
    #[instrument(skip(self, request), fields(run_id = %request.run_id, articles = request.articles.len()))]
    async fn store_articles(&self, request: StoreArticlesRequest) -> Result<StoreArticlesResponse> {
        let started = Instant::now();
        let StoreArticlesRequest { run_id, articles } = request;

        let input_count = articles.len();
        let input_urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
        let (unique, duplicates_skipped) = dedup_by_url(articles);

        let mut failed_urls = Vec::new();
        let mut prepared = Vec::with_capacity(unique.len());
        for article in unique {
            let url = article.url.clone();
            match Self::prepare(article, &run_id) {
                Ok(doc) => prepared.push(doc),
                Err(e) => {
                    warn!(url = %url, error = %e, "Skipping article");
                    failed_urls.push(url);
                }
            }
        }

        let mut stored_count = 0usize;
        let mut batch_count = 0usize;
        let mut last_error: Option<String> = None;

        let mut remaining = prepared.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<PreparedArticle> = remaining.by_ref().take(self.chunk_size).collect();
            let chunk_len = chunk.len();
            let chunk_urls: Vec<String> = chunk.iter().map(|p| p.url.clone()).collect();

            match self.commit_chunk(chunk).await {
                Ok(()) => {
                    stored_count += chunk_len;
                    batch_count += 1;
                }
                Err(e) => {
                    warn!(error = %e, documents = chunk_len, "Article batch commit failed");
                    failed_urls.extend(chunk_urls);
                    last_error = Some(e.to_string());
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;

        if stored_count == 0 && last_error.is_some() {
            warn!(error = ?last_error, "Article store unavailable, nothing stored");
            return Ok(StoreArticlesResponse {
                run_id,
                stored_count: 0,
                failed_count: input_count,
                failed_urls: input_urls,
                storage_stats: StorageStats {
                    duplicates_skipped,
                    batch_count: 0,
                    firestore_writes: 0,
                    latency_ms,
                    error: last_error,
                },
            });
        }

        metrics::record_articles_stored(stored_count as u64);
        info!(stored_count, failed = failed_urls.len(), duplicates_skipped, "Articles stored");

        Ok(StoreArticlesResponse {
            run_id,
            stored_count,
            failed_count: failed_urls.len(),
            failed_urls,
            storage_stats: StorageStats {
                duplicates_skipped,
                batch_count,
                firestore_writes: stored_count,
                latency_ms,
                error: last_error,
            },
        })
    }
}
