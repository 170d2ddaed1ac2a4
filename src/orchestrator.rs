//! Run orchestrator
//!
//! Sequences one ingestion run behind its run record:
//! loading_sources → fetching_feeds → storing_articles → upserting_authors → done.
//! Source, document and sub-batch failures are collected into the run's
//! `errors` list; only an empty catalog, nothing stored, or an escaping
//! error ends the run as `failed`.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::article_store::ArticleSink;
use crate::author::AuthorSink;
use crate::catalog::SourceCatalog;
use crate::config::Config;
use crate::error::{IngestionError, Result};
use crate::harvester::{FeedGroup, Harvester};
use crate::metrics::{self, PhaseTimer};
use crate::registry::{RunCompletion, RunHandle, RunRegistry};
use crate::schemas::{
    poll_url, Article, RunError, RunPhase, RunStats, RunStatus, StoreArticlesRequest, TriggerAccepted,
    TriggerConflict, TriggerIngestionRequest, UpsertAuthorRequest, UpsertStatus,
};

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Articles per article-sink call
    pub store_chunk_size: usize,
    pub store_timeout: Duration,
    pub upsert_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            store_chunk_size: 200,
            store_timeout: Duration::from_secs(120),
            upsert_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            store_chunk_size: config.store_chunk_size.max(1),
            store_timeout: config.store_timeout(),
            upsert_timeout: config.upsert_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Accepted(TriggerAccepted),
    Conflict(TriggerConflict),
}

/// Status a finished run ends with
pub fn final_status(has_errors: bool, articles_stored: u64) -> RunStatus {
    match (has_errors, articles_stored) {
        (true, 0) => RunStatus::Failed,
        (true, _) => RunStatus::CompletedWithErrors,
        (false, _) => RunStatus::Completed,
    }
}

pub struct RunOrchestrator {
    registry: Arc<RunRegistry>,
    catalog: Arc<dyn SourceCatalog>,
    harvester: Arc<Harvester>,
    articles: Arc<dyn ArticleSink>,
    authors: Arc<dyn AuthorSink>,
    settings: PipelineSettings,
    // Serializes the guard check and run creation within this process
    trigger_lock: Mutex<()>,
    tasks: parking_lot::Mutex<JoinSet<()>>,
    // Background runs that have not returned yet, by run id
    in_flight: parking_lot::Mutex<HashMap<String, RunHandle>>,
}

/// Error recorded on runs cut off by shutdown
pub const INTERRUPTED_BY_SHUTDOWN: &str = "Interrupted by shutdown";

impl RunOrchestrator {
    pub fn new(
        registry: Arc<RunRegistry>,
        catalog: Arc<dyn SourceCatalog>,
        harvester: Arc<Harvester>,
        articles: Arc<dyn ArticleSink>,
        authors: Arc<dyn AuthorSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            catalog,
            harvester,
            articles,
            authors,
            settings,
            trigger_lock: Mutex::new(()),
            tasks: parking_lot::Mutex::new(JoinSet::new()),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Guard + create; returns the new run's handle or the conflicting run id
    async fn admit(&self, request: &TriggerIngestionRequest) -> Result<std::result::Result<RunHandle, String>> {
        let _guard = self.trigger_lock.lock().await;

        if let Some(active_run_id) = self.registry.find_active_run().await? {
            info!(active_run_id = %active_run_id, "Rejecting trigger, run already in progress");
            return Ok(Err(active_run_id));
        }

        Ok(Ok(self.registry.create_run(&request.trigger, request.params()).await?))
    }

    fn conflict(active_run_id: String) -> TriggerOutcome {
        TriggerOutcome::Conflict(TriggerConflict {
            message: "An ingestion run is already in progress".to_string(),
            poll_url: poll_url(&active_run_id),
            active_run_id,
        })
    }

    fn accepted(run_id: &str) -> TriggerAccepted {
        TriggerAccepted {
            run_id: run_id.to_string(),
            status: RunStatus::Accepted.as_str().to_string(),
            message: "Ingestion pipeline started. Poll the poll_url for progress.".to_string(),
            poll_url: poll_url(run_id),
        }
    }

    /// Accepts a run and executes it on a background task
    pub async fn trigger(self: &Arc<Self>, request: &TriggerIngestionRequest) -> Result<TriggerOutcome> {
        let handle = match self.admit(request).await? {
            Ok(handle) => handle,
            Err(active_run_id) => return Ok(Self::conflict(active_run_id)),
        };

        let accepted = Self::accepted(&handle.run_id);
        let span = info_span!("ingestion_run", run_id = %handle.run_id);
        self.in_flight.lock().insert(handle.run_id.clone(), handle.clone());

        let this = Arc::clone(self);
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(
            async move {
                let run_id = handle.run_id.clone();
                this.execute(handle).await;
                this.in_flight.lock().remove(&run_id);
            }
            .instrument(span),
        );

        Ok(TriggerOutcome::Accepted(accepted))
    }

    /// Number of background runs still executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Waits up to `grace` for background runs, then aborts the rest and
    /// marks their records failed
    pub async fn shutdown(&self, grace: Duration) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }

        info!(runs = tasks.len(), grace_secs = grace.as_secs(), "Waiting for in-flight runs");
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_ok() {
            info!("In-flight runs drained");
            return;
        }

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        let interrupted: Vec<RunHandle> = self.in_flight.lock().drain().map(|(_, handle)| handle).collect();
        for mut handle in interrupted {
            // A run may have finalized between the grace timeout and the abort
            if let Ok(Some(run)) = self.registry.get_run(&handle.run_id).await {
                if run.status.is_terminal() {
                    continue;
                }
            }

            warn!(run_id = %handle.run_id, "Run interrupted by shutdown");
            match self.registry.mark_failed(&mut handle, INTERRUPTED_BY_SHUTDOWN).await {
                Ok(()) => metrics::record_run_finished(RunStatus::Failed.as_str(), handle.elapsed_secs()),
                Err(e) => error!(run_id = %handle.run_id, error = %e, "Could not mark interrupted run as failed"),
            }
        }
    }

    /// Accepts a run and executes it to completion before returning
    pub async fn run_now(&self, request: &TriggerIngestionRequest) -> Result<TriggerOutcome> {
        let handle = match self.admit(request).await? {
            Ok(handle) => handle,
            Err(active_run_id) => return Ok(Self::conflict(active_run_id)),
        };

        let accepted = Self::accepted(&handle.run_id);
        let span = info_span!("ingestion_run", run_id = %handle.run_id);
        self.execute(handle).instrument(span).await;

        Ok(TriggerOutcome::Accepted(accepted))
    }

    /// Runs the pipeline; anything escaping it (errors and panics) marks the run failed
    async fn execute(&self, mut handle: RunHandle) {
        let outcome = AssertUnwindSafe(self.run_pipeline(&mut handle)).catch_unwind().await;

        let message = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("Pipeline exception: {e}"),
            Err(_) => "Pipeline exception: pipeline task panicked".to_string(),
        };

        error!(run_id = %handle.run_id, error = %message, "Ingestion pipeline failed");
        match self.registry.mark_failed(&mut handle, &message).await {
            Ok(()) => metrics::record_run_finished(RunStatus::Failed.as_str(), handle.elapsed_secs()),
            Err(e) => error!(run_id = %handle.run_id, error = %e, "Could not mark run as failed"),
        }
    }

    async fn run_pipeline(&self, handle: &mut RunHandle) -> Result<()> {
        let run_id = handle.run_id.clone();
        self.registry.mark_running(handle).await?;

        let sources = {
            let _timer = PhaseTimer::new("loading_sources");
            self.catalog.load().unwrap_or_else(|e| {
                error!(error = %e, "Failed to load sources");
                vec![]
            })
        };

        if sources.is_empty() {
            let completion = RunCompletion {
                status: RunStatus::Failed,
                phase: RunPhase::LoadingSources,
                stats: RunStats::default(),
                errors: vec![RunError::new("No sources loaded from config")],
            };
            let duration = self.registry.finalize(handle, completion).await?;
            metrics::record_run_finished(RunStatus::Failed.as_str(), duration);
            warn!(run_id = %run_id, "No sources loaded, run failed");
            return Ok(());
        }

        let mut stats = RunStats {
            sources_checked: sources.len() as u64,
            ..Default::default()
        };
        self.registry.advance(handle, RunPhase::FetchingFeeds, &stats).await?;

        let report = {
            let _timer = PhaseTimer::new("fetching_feeds");
            self.harvester.harvest(&sources, handle.params, &run_id).await
        };
        let mut errors = report.errors.clone();
        stats.sources_failed = report.sources_failed as u64;
        stats.articles_fetched = report.all_articles.len() as u64;

        self.registry.advance(handle, RunPhase::StoringArticles, &stats).await?;
        stats.articles_stored = {
            let _timer = PhaseTimer::new("storing_articles");
            self.store_articles(&run_id, &report.all_articles, &mut errors).await
        };

        self.registry.advance(handle, RunPhase::UpsertingAuthors, &stats).await?;
        stats.authors_upserted = {
            let _timer = PhaseTimer::new("upserting_authors");
            self.upsert_authors(report.feed_groups(), &mut errors).await
        };

        let status = final_status(!errors.is_empty(), stats.articles_stored);
        let error_count = errors.len();
        let duration = self
            .registry
            .finalize(
                handle,
                RunCompletion {
                    status,
                    phase: RunPhase::Done,
                    stats,
                    errors,
                },
            )
            .await?;

        metrics::record_run_finished(status.as_str(), duration);
        info!(
            run_id = %run_id,
            status = %status,
            sources_checked = stats.sources_checked,
            sources_failed = stats.sources_failed,
            articles_fetched = stats.articles_fetched,
            articles_stored = stats.articles_stored,
            authors_upserted = stats.authors_upserted,
            error_count,
            duration_seconds = duration,
            "Ingestion run completed"
        );
        Ok(())
    }

    /// Sends articles to the sink in sub-batches; a failed sub-batch is
    /// recorded and the next one is still attempted
    async fn store_articles(&self, run_id: &str, articles: &[Article], errors: &mut Vec<RunError>) -> u64 {
        let chunk_size = self.settings.store_chunk_size;
        let timeout = self.settings.store_timeout;
        let mut stored = 0u64;

        for (index, chunk) in articles.chunks(chunk_size).enumerate() {
            let batch_start = index * chunk_size;
            let request = StoreArticlesRequest {
                run_id: run_id.to_string(),
                articles: chunk.to_vec(),
            };

            match tokio::time::timeout(timeout, self.articles.store_articles(request)).await {
                Ok(Ok(response)) => {
                    stored += response.stored_count as u64;
                    if let Some(e) = response.storage_stats.error {
                        errors.push(RunError::for_batch(format!("store_articles reported error: {e}"), batch_start));
                    }
                }
                Ok(Err(e)) => {
                    warn!(batch_start, error = %e, "Article sub-batch failed");
                    errors.push(RunError::for_batch(format!("store_articles failed: {e}"), batch_start));
                }
                Err(_) => {
                    warn!(batch_start, "Article sub-batch timed out");
                    errors.push(RunError::for_batch(
                        format!("store_articles failed: {}", IngestionError::Timeout(timeout.as_secs())),
                        batch_start,
                    ));
                }
            }
        }

        stored
    }

    /// One upsert per feed group; returns how many were created or updated
    async fn upsert_authors(&self, groups: Vec<FeedGroup>, errors: &mut Vec<RunError>) -> u64 {
        let timeout = self.settings.upsert_timeout;
        let mut upserted = 0u64;

        for group in groups.into_iter().filter(|g| !g.articles.is_empty()) {
            let feed_url = group.feed_url.clone();
            let request = UpsertAuthorRequest {
                feed_url: group.feed_url,
                articles: group.articles,
                feed_metadata: group.feed_metadata,
            };

            match tokio::time::timeout(timeout, self.authors.upsert_author(request)).await {
                Ok(Ok(response)) if response.status.is_upserted() => upserted += 1,
                Ok(Ok(response)) => {
                    if response.status == UpsertStatus::Failed {
                        warn!(feed_url = %feed_url, error = ?response.error, "Author upsert failed");
                    }
                }
                Ok(Err(e)) => errors.push(RunError::new(format!("upsert_author failed for {feed_url}: {e}"))),
                Err(_) => errors.push(RunError::new(format!(
                    "upsert_author failed for {feed_url}: {}",
                    IngestionError::Timeout(timeout.as_secs())
                ))),
            }
        }

        upserted
    }
}
