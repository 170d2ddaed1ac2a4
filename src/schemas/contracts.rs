//! Sub-call Contracts
//!
//! Request/response shapes for the three internal tools the orchestrator
//! drives: fetch a feed, store articles, upsert an author. They are served
//! over HTTP as well, so field names follow the wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use super::article::{Article, FeedMetadata, RawArticle};
use super::author::UpsertStatus;
use super::ingestion_run::{evaluate_run_success, RunParams, RunStats, RunStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct FeedRequest {
    pub feed_url: String,
    #[serde(default = "default_time_window_hours")]
    #[validate(range(min = 1, max = 720))]
    pub time_window_hours: u32,
    #[serde(default = "default_max_items")]
    #[validate(range(min = 1, max = 500))]
    pub max_items: u32,
    #[serde(default)]
    pub request_id: Option<String>,
}

fn default_time_window_hours() -> u32 {
    24
}

fn default_max_items() -> u32 {
    50
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedResponse {
    pub articles: Vec<RawArticle>,
    #[serde(default)]
    pub feed_metadata: Option<FeedMetadata>,
    pub article_count: usize,
}

impl FeedResponse {
    pub fn new(articles: Vec<RawArticle>, feed_metadata: Option<FeedMetadata>) -> Self {
        Self {
            article_count: articles.len(),
            articles,
            feed_metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreArticlesRequest {
    pub run_id: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageStats {
    pub duplicates_skipped: usize,
    pub batch_count: usize,
    pub firestore_writes: usize,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreArticlesResponse {
    pub run_id: String,
    pub stored_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub failed_urls: Vec<String>,
    pub storage_stats: StorageStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAuthorRequest {
    pub feed_url: String,
    pub articles: Vec<Article>,
    #[serde(default)]
    pub feed_metadata: Option<FeedMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpsertAuthorResponse {
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    pub status: UpsertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpsertAuthorResponse {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            author_id: None,
            author_name: None,
            status: UpsertStatus::Skipped,
            error: Some(reason.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            author_id: None,
            author_name: None,
            status: UpsertStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Body of `POST /ingestion`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TriggerIngestionRequest {
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default = "default_time_window_hours")]
    #[validate(range(min = 1, max = 720))]
    pub time_window_hours: u32,
    #[serde(default = "default_max_items")]
    #[validate(range(min = 1, max = 500))]
    pub max_items_per_source: u32,
}

fn default_trigger() -> String {
    "manual".to_string()
}

impl Default for TriggerIngestionRequest {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
            time_window_hours: default_time_window_hours(),
            max_items_per_source: default_max_items(),
        }
    }
}

impl TriggerIngestionRequest {
    pub fn params(&self) -> RunParams {
        RunParams {
            time_window_hours: self.time_window_hours,
            max_items_per_source: self.max_items_per_source,
        }
    }
}

/// 202 body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerAccepted {
    pub run_id: String,
    pub status: String,
    pub message: String,
    pub poll_url: String,
}

/// 409 body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConflict {
    pub message: String,
    pub active_run_id: String,
    pub poll_url: String,
}

/// Poll URL for a run
pub fn poll_url(run_id: &str) -> String {
    format!("/ingestion/{run_id}")
}

/// Body of `GET /ingestion/{run_id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionRunStatus {
    pub run_id: String,
    pub status: String,
    pub phase: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub stats: Option<Value>,
    pub errors: Option<Value>,
    pub is_successful: Option<bool>,
}

impl IngestionRunStatus {
    /// Builds the status view from a raw run document.
    ///
    /// Reads fields leniently so a partially written or hand-edited document
    /// still renders; success is evaluated for terminal statuses only.
    pub fn from_document(run_id: &str, doc: &Map<String, Value>) -> Self {
        let text = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_string);

        let status = text("status").unwrap_or_else(|| "unknown".to_string());
        let duration_seconds = doc.get("duration").and_then(Value::as_f64);
        let stats = doc.get("stats").cloned();

        let is_terminal = serde_json::from_value::<RunStatus>(Value::String(status.clone()))
            .map(|s| s.is_terminal())
            .unwrap_or(false);
        let is_successful = is_terminal.then(|| {
            let parsed: RunStats = stats
                .clone()
                .and_then(|s| serde_json::from_value(s).ok())
                .unwrap_or_default();
            evaluate_run_success(&parsed, duration_seconds)
        });

        Self {
            run_id: run_id.to_string(),
            status,
            phase: text("phase"),
            started_at: text("startedAt"),
            completed_at: text("completedAt"),
            duration_seconds,
            stats,
            errors: doc.get("errors").cloned(),
            is_successful,
        }
    }
}
