//! Run registry
//!
//! Owns the lifecycle of `ingestion_runs` documents: creation, the
//! idempotency guard, phase transitions and the final write. Transitions are
//! checked against a `RunHandle` held by the executing task, so status and
//! phase only ever move forward without re-reading the document.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{IngestionError, Result};
use crate::schemas::{
    format_timestamp, parse_timestamp, IngestionRun, IngestionRunStatus, RunError, RunParams, RunPhase, RunStats,
    RunStatus,
};
use crate::storage::{collections, to_document, Direction, Document, DocumentStore, Query, WriteMode};

/// `run-` + 12 lowercase hex chars of a v4 UUID
pub fn new_run_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("run-{}", &hex[..12])
}

/// In-process view of a run, used to validate every transition
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub params: RunParams,
    status: RunStatus,
    phase: RunPhase,
    started: Instant,
}

impl RunHandle {
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Seconds since the run was created, rounded to 2 decimals
    pub fn elapsed_secs(&self) -> f64 {
        (self.started.elapsed().as_secs_f64() * 100.0).round() / 100.0
    }

    fn check_status(&self, next: RunStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(IngestionError::InvalidTransition(format!(
                "{}: status {} -> {}",
                self.run_id, self.status, next
            )))
        }
    }

    fn check_phase(&self, next: RunPhase) -> Result<()> {
        if self.phase.can_advance_to(next) {
            Ok(())
        } else {
            Err(IngestionError::InvalidTransition(format!(
                "{}: phase {} -> {}",
                self.run_id, self.phase, next
            )))
        }
    }
}

/// Everything written by the final update
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub phase: RunPhase,
    pub stats: RunStats,
    pub errors: Vec<RunError>,
}

pub struct RunRegistry {
    store: Arc<dyn DocumentStore>,
    stale_threshold: Duration,
    max_errors: usize,
}

impl RunRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, stale_threshold: Duration, max_errors: usize) -> Self {
        Self {
            store,
            stale_threshold,
            max_errors,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::new(store, config.stale_run_threshold(), config.max_run_errors)
    }

    /// Writes the initial `accepted` record
    pub async fn create_run(&self, trigger: &str, params: RunParams) -> Result<RunHandle> {
        let run_id = new_run_id();
        let run = IngestionRun::new(&run_id, trigger, params, Utc::now());

        self.store
            .set(collections::INGESTION_RUNS, &run_id, to_document(&run)?, WriteMode::Overwrite)
            .await?;

        info!(run_id = %run_id, trigger = %trigger, "Ingestion run accepted");

        Ok(RunHandle {
            run_id,
            params,
            status: run.status,
            phase: run.phase,
            started: Instant::now(),
        })
    }

    /// Idempotency guard: the id of a live run, if any.
    ///
    /// The most recent accepted/running run blocks while younger than the
    /// stale threshold; an older one is force-failed and no longer blocks.
    pub async fn find_active_run(&self) -> Result<Option<String>> {
        self.find_active_run_at(Utc::now()).await
    }

    pub async fn find_active_run_at(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let active: Vec<Value> = RunStatus::ACTIVE.iter().map(|s| json!(s.as_str())).collect();
        let query = Query::collection(collections::INGESTION_RUNS)
            .where_in("status", active)
            .order_by("startedAt", Direction::Descending)
            .limit(1);

        for (run_id, doc) in self.store.query(&query).await? {
            let threshold = self.stale_threshold.as_secs() as i64;
            let age_secs = match doc.get("startedAt").and_then(Value::as_str).and_then(parse_timestamp) {
                Some(started_at) => (now - started_at).num_seconds(),
                None => {
                    error!(run_id = %run_id, started_at = ?doc.get("startedAt"), "Unreadable startedAt, treating run as stale");
                    threshold + 1
                }
            };

            if age_secs < threshold {
                return Ok(Some(run_id));
            }

            let mut cleanup = Document::new();
            cleanup.insert("status".into(), json!(RunStatus::Failed));
            cleanup.insert("phase".into(), json!(RunPhase::StaleCleanup));
            cleanup.insert("completedAt".into(), json!(format_timestamp(&now)));
            cleanup.insert(
                "errors".into(),
                json!([RunError::new(format!("Marked as failed: stale after {age_secs}s"))]),
            );
            self.store.update(collections::INGESTION_RUNS, &run_id, cleanup).await?;

            warn!(run_id = %run_id, age_secs, "Cleaned up stale run");
        }

        Ok(None)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<IngestionRun>> {
        match self.store.get(collections::INGESTION_RUNS, run_id).await? {
            Some(doc) => {
                let mut run: IngestionRun = crate::storage::from_document(doc)?;
                run.run_id = run_id.to_string();
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// Status view for pollers
    pub async fn get_status(&self, run_id: &str) -> Result<Option<IngestionRunStatus>> {
        Ok(self
            .store
            .get(collections::INGESTION_RUNS, run_id)
            .await?
            .map(|doc| IngestionRunStatus::from_document(run_id, &doc)))
    }

    /// accepted → running, entering `loading_sources`
    pub async fn mark_running(&self, handle: &mut RunHandle) -> Result<()> {
        handle.check_status(RunStatus::Running)?;
        handle.check_phase(RunPhase::LoadingSources)?;

        let mut fields = Document::new();
        fields.insert("status".into(), json!(RunStatus::Running));
        fields.insert("phase".into(), json!(RunPhase::LoadingSources));
        self.store.update(collections::INGESTION_RUNS, &handle.run_id, fields).await?;

        handle.status = RunStatus::Running;
        handle.phase = RunPhase::LoadingSources;
        Ok(())
    }

    /// Moves to the next phase, rewriting the stats snapshot
    pub async fn advance(&self, handle: &mut RunHandle, phase: RunPhase, stats: &RunStats) -> Result<()> {
        handle.check_phase(phase)?;

        let mut fields = Document::new();
        fields.insert("phase".into(), json!(phase));
        fields.insert("stats".into(), serde_json::to_value(stats)?);
        self.store.update(collections::INGESTION_RUNS, &handle.run_id, fields).await?;

        handle.phase = phase;
        Ok(())
    }

    /// Single terminal write; returns the recorded duration
    pub async fn finalize(&self, handle: &mut RunHandle, completion: RunCompletion) -> Result<f64> {
        handle.check_status(completion.status)?;
        if completion.phase != handle.phase {
            handle.check_phase(completion.phase)?;
        }

        let duration = handle.elapsed_secs();
        let mut errors = completion.errors;
        errors.truncate(self.max_errors);

        let mut fields = Document::new();
        fields.insert("status".into(), json!(completion.status));
        fields.insert("phase".into(), json!(completion.phase));
        fields.insert("completedAt".into(), json!(format_timestamp(&Utc::now())));
        fields.insert("duration".into(), json!(duration));
        fields.insert("stats".into(), serde_json::to_value(completion.stats)?);
        fields.insert("errors".into(), serde_json::to_value(&errors)?);
        self.store.update(collections::INGESTION_RUNS, &handle.run_id, fields).await?;

        handle.status = completion.status;
        handle.phase = completion.phase;
        Ok(duration)
    }

    /// Best-effort failure write used when the pipeline itself errors out
    pub async fn mark_failed(&self, handle: &mut RunHandle, message: &str) -> Result<()> {
        if handle.status.is_terminal() {
            return Err(IngestionError::InvalidTransition(format!(
                "{}: already {}",
                handle.run_id, handle.status
            )));
        }

        let mut fields = Document::new();
        fields.insert("status".into(), json!(RunStatus::Failed));
        fields.insert("completedAt".into(), json!(format_timestamp(&Utc::now())));
        fields.insert("duration".into(), json!(handle.elapsed_secs()));
        fields.insert("errors".into(), json!([RunError::new(message)]));
        self.store.update(collections::INGESTION_RUNS, &handle.run_id, fields).await?;

        handle.status = RunStatus::Failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;

    fn registry(store: Arc<MemoryDocumentStore>) -> RunRegistry {
        RunRegistry::new(store, Duration::from_secs(600), 50)
    }

    async fn insert_run(store: &MemoryDocumentStore, run_id: &str, status: &str, started_at: Value) {
        let doc = json!({ "status": status, "phase": "fetching_feeds", "startedAt": started_at });
        store
            .set(collections::INGESTION_RUNS, run_id, doc.as_object().cloned().unwrap(), WriteMode::Overwrite)
            .await
            .unwrap();
    }

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_create_run_blocks_new_runs() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());

        let handle = registry.create_run("manual", RunParams::default()).await.unwrap();
        let run = registry.get_run(&handle.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Accepted);
        assert_eq!(run.phase, RunPhase::Initializing);

        assert_eq!(registry.find_active_run().await.unwrap(), Some(handle.run_id));
    }

    #[tokio::test]
    async fn test_stale_run_is_reclaimed() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());
        let started = Utc::now() - chrono::Duration::minutes(20);
        insert_run(&store, "run-stale", "running", json!(format_timestamp(&started))).await;

        assert_eq!(registry.find_active_run().await.unwrap(), None);

        let run = registry.get_run("run-stale").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.phase, RunPhase::StaleCleanup);
        assert!(run.completed_at.is_some());
        assert!(run.errors[0].message.starts_with("Marked as failed: stale after 1200"));
    }

    #[tokio::test]
    async fn test_unreadable_started_at_is_stale() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());
        insert_run(&store, "run-garbled", "accepted", json!("yesterday-ish")).await;

        assert_eq!(registry.find_active_run().await.unwrap(), None);

        let doc = store.get(collections::INGESTION_RUNS, "run-garbled").await.unwrap().unwrap();
        assert_eq!(doc["status"], "failed");
        assert_eq!(doc["errors"][0]["message"], "Marked as failed: stale after 601s");
    }

    #[tokio::test]
    async fn test_recent_run_blocks_at_threshold_edge() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());
        let now = Utc::now();
        insert_run(&store, "run-young", "running", json!(format_timestamp(&(now - chrono::Duration::seconds(599))))).await;

        assert_eq!(registry.find_active_run_at(now).await.unwrap(), Some("run-young".to_string()));
    }

    #[tokio::test]
    async fn test_transitions_are_enforced() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());
        let mut handle = registry.create_run("manual", RunParams::default()).await.unwrap();

        assert!(registry.advance(&mut handle, RunPhase::FetchingFeeds, &RunStats::default()).await.is_ok());
        assert!(matches!(
            registry.advance(&mut handle, RunPhase::LoadingSources, &RunStats::default()).await,
            Err(IngestionError::InvalidTransition(_))
        ));

        let completion = RunCompletion {
            status: RunStatus::Completed,
            phase: RunPhase::Done,
            stats: RunStats::default(),
            errors: vec![],
        };
        // accepted cannot jump straight to completed
        assert!(registry.finalize(&mut handle, completion).await.is_err());
    }

    #[tokio::test]
    async fn test_finalize_caps_errors() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry(store.clone());
        let mut handle = registry.create_run("manual", RunParams::default()).await.unwrap();
        registry.mark_running(&mut handle).await.unwrap();

        let completion = RunCompletion {
            status: RunStatus::CompletedWithErrors,
            phase: RunPhase::Done,
            stats: RunStats {
                articles_stored: 3,
                ..Default::default()
            },
            errors: (0..80).map(|i| RunError::new(format!("error {i}"))).collect(),
        };
        registry.finalize(&mut handle, completion).await.unwrap();

        let run = registry.get_run(&handle.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::CompletedWithErrors);
        assert_eq!(run.errors.len(), 50);
        assert!(run.completed_at.is_some());
        assert!(run.duration.is_some());
        assert_eq!(registry.find_active_run().await.unwrap(), None);
    }
}
