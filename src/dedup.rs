//! Deduplication and document keys
//!
//! Articles are keyed by the SHA-256 of their exact URL, authors by a
//! truncated hash of their feed URL. No URL normalization is applied, so the
//! same key is produced by every tool that writes these collections.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use crate::schemas::Article;

/// Hex chars of the feed URL hash kept in an author id
const AUTHOR_ID_HASH_LEN: usize = 16;

/// Computes SHA-256 hash of content
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Document id of an article in the `articles` collection
pub fn article_id(url: &str) -> String {
    compute_hash(url)
}

/// Document id of an author: `author-` plus the first 16 hex chars of the feed URL hash
pub fn author_id(feed_url: &str) -> String {
    let hash = compute_hash(feed_url);
    format!("author-{}", &hash[..AUTHOR_ID_HASH_LEN])
}

/// Drops repeated URLs within one batch, keeping the first occurrence.
///
/// Returns the unique articles in input order and the number skipped.
pub fn dedup_by_url(articles: Vec<Article>) -> (Vec<Article>, usize) {
    let total = articles.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(total);

    let unique: Vec<Article> = articles
        .into_iter()
        .filter(|article| seen.insert(article.url.clone()))
        .collect();

    let skipped = total - unique.len();
    if skipped > 0 {
        debug!(skipped, unique = unique.len(), "Dropped duplicate URLs from batch");
    }
    (unique, skipped)
}
