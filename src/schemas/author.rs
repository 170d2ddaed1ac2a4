//! Author Schema
//!
//! One freshness record per feed in the `authors` collection. The same key is
//! produced by the feed import tooling, so a feed discovered either way
//! resolves to the same document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{optional_timestamp, timestamp};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRecord {
    pub name: String,
    pub feed_url: String,
    pub website_url: String,
    #[serde(with = "timestamp")]
    pub last_published: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_fetched: DateTime<Utc>,
    pub article_count: u64,
    #[serde(default)]
    pub categories: Vec<String>,
    pub status: String,
    pub consecutive_errors: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_description: Option<String>,
    /// Set on creation only; `None` leaves a stored value untouched on merge
    #[serde(default, with = "optional_timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one author upsert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl UpsertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertStatus::Created => "created",
            UpsertStatus::Updated => "updated",
            UpsertStatus::Skipped => "skipped",
            UpsertStatus::Failed => "failed",
        }
    }

    /// Created and updated both count as a successful upsert
    pub fn is_upserted(&self) -> bool {
        matches!(self, UpsertStatus::Created | UpsertStatus::Updated)
    }
}

impl fmt::Display for UpsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_record_camel_case() {
        let now = Utc::now();
        let record = AuthorRecord {
            name: "Example".to_string(),
            feed_url: "https://example.com/feed".to_string(),
            website_url: "https://example.com".to_string(),
            last_published: now,
            last_fetched: now,
            article_count: 3,
            categories: vec!["ai".to_string()],
            status: "active".to_string(),
            consecutive_errors: 0,
            feed_description: None,
            created_at: None,
            updated_at: now,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["feedUrl"], "https://example.com/feed");
        assert_eq!(json["articleCount"], 3);
        assert_eq!(json["consecutiveErrors"], 0);
        assert!(json.get("feedDescription").is_none());
        assert!(json.get("createdAt").is_none());
    }

    #[test]
    fn test_upsert_status() {
        assert!(UpsertStatus::Created.is_upserted());
        assert!(UpsertStatus::Updated.is_upserted());
        assert!(!UpsertStatus::Skipped.is_upserted());
        assert_eq!(serde_json::to_string(&UpsertStatus::Failed).unwrap(), "\"failed\"");
    }
}
