//! IngestionRun Schema
//!
//! One document per pipeline execution in the `ingestion_runs` collection.
//! Status moves accepted → running → terminal; phase advances forward only,
//! except for `stale_cleanup` which the idempotency guard may apply at any point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{optional_timestamp, timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Accepted,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    /// Statuses that block a new run from starting
    pub const ACTIVE: [RunStatus; 2] = [RunStatus::Accepted, RunStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Accepted => "accepted",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Accepted | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Accepted => matches!(next, RunStatus::Running | RunStatus::Failed),
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    LoadingSources,
    FetchingFeeds,
    StoringArticles,
    UpsertingAuthors,
    Done,
    StaleCleanup,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Initializing => "initializing",
            RunPhase::LoadingSources => "loading_sources",
            RunPhase::FetchingFeeds => "fetching_feeds",
            RunPhase::StoringArticles => "storing_articles",
            RunPhase::UpsertingAuthors => "upserting_authors",
            RunPhase::Done => "done",
            RunPhase::StaleCleanup => "stale_cleanup",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RunPhase::Initializing => 0,
            RunPhase::LoadingSources => 1,
            RunPhase::FetchingFeeds => 2,
            RunPhase::StoringArticles => 3,
            RunPhase::UpsertingAuthors => 4,
            RunPhase::Done => 5,
            RunPhase::StaleCleanup => 6,
        }
    }

    /// Phases only move forward; `stale_cleanup` is reachable from anywhere
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        next == RunPhase::StaleCleanup || next.rank() > self.rank()
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters, rewritten as a whole at each phase boundary.
///
/// Serialized with an extra `articlesIngested` mirror of `articlesStored`,
/// the name older dashboards read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", into = "RunStatsDocument")]
pub struct RunStats {
    #[serde(default)]
    pub sources_checked: u64,
    #[serde(default)]
    pub sources_failed: u64,
    #[serde(default)]
    pub articles_fetched: u64,
    #[serde(default)]
    pub articles_stored: u64,
    #[serde(default)]
    pub authors_upserted: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunStatsDocument {
    sources_checked: u64,
    sources_failed: u64,
    articles_fetched: u64,
    articles_stored: u64,
    articles_ingested: u64,
    authors_upserted: u64,
}

impl From<RunStats> for RunStatsDocument {
    fn from(stats: RunStats) -> Self {
        Self {
            sources_checked: stats.sources_checked,
            sources_failed: stats.sources_failed,
            articles_fetched: stats.articles_fetched,
            articles_stored: stats.articles_stored,
            articles_ingested: stats.articles_stored,
            authors_upserted: stats.authors_upserted,
        }
    }
}

/// One entry in a run's `errors` list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_start: Option<usize>,
}

impl RunError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
            url: None,
            batch_start: None,
        }
    }

    pub fn for_source(source: impl Into<String>, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            url: Some(url.into()),
            ..Self::new(message)
        }
    }

    pub fn for_batch(message: impl Into<String>, batch_start: usize) -> Self {
        Self {
            batch_start: Some(batch_start),
            ..Self::new(message)
        }
    }
}

/// Immutable parameters of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub time_window_hours: u32,
    pub max_items_per_source: u32,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            time_window_hours: 24,
            max_items_per_source: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    #[serde(default)]
    pub run_id: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    #[serde(default)]
    pub trigger: String,
    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "optional_timestamp", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub time_window_hours: u32,
    #[serde(default)]
    pub max_items_per_source: u32,
    #[serde(default)]
    pub stats: RunStats,
    #[serde(default)]
    pub errors: Vec<RunError>,
}

impl IngestionRun {
    /// Builds the initial `accepted` record
    pub fn new(run_id: impl Into<String>, trigger: impl Into<String>, params: RunParams, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Accepted,
            phase: RunPhase::Initializing,
            trigger: trigger.into(),
            started_at: now,
            completed_at: None,
            duration: None,
            time_window_hours: params.time_window_hours,
            max_items_per_source: params.max_items_per_source,
            stats: RunStats::default(),
            errors: vec![],
        }
    }

    pub fn params(&self) -> RunParams {
        RunParams {
            time_window_hours: self.time_window_hours,
            max_items_per_source: self.max_items_per_source,
        }
    }
}

/// Runs slower than this are never judged successful
pub const MAX_SUCCESSFUL_DURATION_SECS: f64 = 300.0;

/// Whether a finished run counts as successful.
///
/// Something was stored, fewer than half the checked sources failed, and the
/// run took at most five minutes (an unset or zero duration passes).
pub fn evaluate_run_success(stats: &RunStats, duration: Option<f64>) -> bool {
    if stats.articles_stored == 0 {
        return false;
    }

    if stats.sources_checked > 0
        && (stats.sources_failed as f64 / stats.sources_checked as f64) >= 0.5
    {
        return false;
    }

    !matches!(duration, Some(d) if d > MAX_SUCCESSFUL_DURATION_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(checked: u64, failed: u64, stored: u64) -> RunStats {
        RunStats {
            sources_checked: checked,
            sources_failed: failed,
            articles_stored: stored,
            ..Default::default()
        }
    }

    #[test]
    fn test_success_evaluation_boundaries() {
        assert!(!evaluate_run_success(&stats(10, 5, 10), Some(12.0)));
        assert!(evaluate_run_success(&stats(100, 49, 10), Some(12.0)));
        assert!(!evaluate_run_success(&stats(10, 0, 0), Some(12.0)));
        assert!(evaluate_run_success(&stats(0, 0, 10), None));
        assert!(evaluate_run_success(&stats(10, 0, 10), Some(0.0)));
        assert!(evaluate_run_success(&stats(10, 0, 10), Some(300.0)));
        assert!(!evaluate_run_success(&stats(10, 0, 10), Some(300.01)));
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(RunStatus::Accepted.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Accepted.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::CompletedWithErrors));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Accepted));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_phase_only_advances() {
        assert!(RunPhase::Initializing.can_advance_to(RunPhase::LoadingSources));
        assert!(RunPhase::StoringArticles.can_advance_to(RunPhase::Done));
        assert!(!RunPhase::UpsertingAuthors.can_advance_to(RunPhase::FetchingFeeds));
        assert!(!RunPhase::FetchingFeeds.can_advance_to(RunPhase::FetchingFeeds));
        assert!(RunPhase::Done.can_advance_to(RunPhase::StaleCleanup));
    }

    #[test]
    fn test_run_document_shape() {
        let run = IngestionRun::new("run-abc", "manual", RunParams::default(), Utc::now());
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["status"], "accepted");
        assert_eq!(json["phase"], "initializing");
        assert_eq!(json["timeWindowHours"], 24);
        assert_eq!(json["maxItemsPerSource"], 50);
        assert!(json.get("completedAt").is_none());
        assert!(json["startedAt"].as_str().unwrap().ends_with('Z'));

        let parsed: IngestionRun = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.status, RunStatus::Accepted);
        assert_eq!(parsed.stats, RunStats::default());
    }

    #[test]
    fn test_stats_mirror_articles_ingested() {
        let stats = RunStats {
            sources_checked: 4,
            articles_stored: 17,
            ..Default::default()
        };

        let value = serde_json::to_value(stats).unwrap();
        assert_eq!(value["articlesStored"], 17);
        assert_eq!(value["articlesIngested"], 17);

        let back: RunStats = serde_json::from_value(value).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_run_error_omits_empty_context() {
        let json = serde_json::to_value(RunError::new("boom")).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "boom" }));

        let json = serde_json::to_value(RunError::for_batch("store_articles returned 500", 200)).unwrap();
        assert_eq!(json["batch_start"], 200);
    }
}
