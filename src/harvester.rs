//! Fan-out feed harvester
//!
//! Every source is spawned as its own task; a counting semaphore admits at
//! most `max_concurrent` fetches at once and each fetch runs under its own
//! timeout. Network errors, parse errors, timeouts and task panics all become
//! that source's error and never abort the batch. All tasks are joined before
//! the report is returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::IngestionError;
use crate::feeds::FeedFetcher;
use crate::metrics::{self, InFlightGuard};
use crate::schemas::{Article, FeedMetadata, FeedRequest, RawArticle, RunError, RunParams, Source};

/// Result of fetching one source
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source: Source,
    pub articles: Vec<RawArticle>,
    pub feed_metadata: Option<FeedMetadata>,
    pub error: Option<String>,
}

impl FetchOutcome {
    fn failed(source: Source, error: impl Into<String>) -> Self {
        Self {
            source,
            articles: vec![],
            feed_metadata: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Articles of one feed, handed to the author upserter
#[derive(Debug, Clone)]
pub struct FeedGroup {
    pub feed_url: String,
    pub articles: Vec<Article>,
    pub feed_metadata: Option<FeedMetadata>,
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    /// One outcome per input source, in input order
    pub results: Vec<FetchOutcome>,
    /// Normalized articles from every successful source
    pub all_articles: Vec<Article>,
    pub errors: Vec<RunError>,
    pub sources_failed: usize,
}

impl HarvestReport {
    fn from_outcomes(results: Vec<FetchOutcome>) -> Self {
        let mut all_articles = Vec::new();
        let mut errors = Vec::new();
        let mut sources_failed = 0;

        for outcome in &results {
            match &outcome.error {
                Some(message) => {
                    errors.push(RunError::for_source(
                        outcome.source.name.clone(),
                        outcome.source.url.clone(),
                        message.clone(),
                    ));
                    sources_failed += 1;
                }
                None => all_articles.extend(
                    outcome
                        .articles
                        .iter()
                        .map(|raw| Article::from_raw(raw, &outcome.source)),
                ),
            }
        }

        Self {
            results,
            all_articles,
            errors,
            sources_failed,
        }
    }

    /// Successful outcomes grouped by feed URL, in first-seen order
    pub fn feed_groups(&self) -> Vec<FeedGroup> {
        let mut groups: Vec<FeedGroup> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for outcome in self.results.iter().filter(|o| o.is_ok()) {
            let slot = *index.entry(outcome.source.url.as_str()).or_insert_with(|| {
                groups.push(FeedGroup {
                    feed_url: outcome.source.url.clone(),
                    articles: vec![],
                    feed_metadata: outcome.feed_metadata.clone(),
                });
                groups.len() - 1
            });
            groups[slot].articles.extend(
                outcome
                    .articles
                    .iter()
                    .map(|raw| Article::from_raw(raw, &outcome.source)),
            );
        }

        groups
    }
}

pub struct Harvester {
    fetcher: Arc<dyn FeedFetcher>,
    max_concurrent: usize,
    fetch_timeout: Duration,
}

impl Harvester {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, max_concurrent: usize, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            max_concurrent: max_concurrent.max(1),
            fetch_timeout,
        }
    }

    pub fn from_config(fetcher: Arc<dyn FeedFetcher>, config: &Config) -> Self {
        Self::new(fetcher, config.max_concurrent_fetches, config.fetch_timeout())
    }

    /// Fetches every source concurrently and aggregates the outcomes
    #[instrument(skip(self, sources), fields(run_id = %run_id, sources = sources.len()))]
    pub async fn harvest(&self, sources: &[Source], params: RunParams, run_id: &str) -> HarvestReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|source| {
                let semaphore = semaphore.clone();
                let fetcher = self.fetcher.clone();
                let timeout = self.fetch_timeout;
                let request = FeedRequest {
                    feed_url: source.url.clone(),
                    time_window_hours: params.time_window_hours,
                    max_items: params.max_items_per_source,
                    request_id: Some(format!("{}_{}", run_id, source.source_id)),
                };

                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return FetchOutcome::failed(source, "fetch semaphore closed"),
                    };
                    let _in_flight = InFlightGuard::new();

                    match tokio::time::timeout(timeout, fetcher.fetch(&request)).await {
                        Ok(Ok(response)) => {
                            metrics::record_feed_fetch("ok");
                            debug!(source = %source.name, articles = response.article_count, "Feed fetched");
                            FetchOutcome {
                                source,
                                articles: response.articles,
                                feed_metadata: response.feed_metadata,
                                error: None,
                            }
                        }
                        Ok(Err(e)) => {
                            metrics::record_feed_fetch("error");
                            warn!(source = %source.name, error = %e, "Feed fetch failed");
                            FetchOutcome::failed(source, e.to_string())
                        }
                        Err(_) => {
                            metrics::record_feed_fetch("timeout");
                            warn!(source = %source.name, "Feed fetch timed out");
                            FetchOutcome::failed(source, IngestionError::Timeout(timeout.as_secs()).to_string())
                        }
                    }
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        let outcomes: Vec<FetchOutcome> = sources
            .iter()
            .zip(joined)
            .map(|(source, result)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics::record_feed_fetch("panic");
                    warn!(source = %source.name, error = %e, "Fetch task aborted");
                    FetchOutcome::failed(source.clone(), format!("fetch task failed: {e}"))
                }
            })
            .collect();

        let report = HarvestReport::from_outcomes(outcomes);
        info!(
            articles = report.all_articles.len(),
            sources_failed = report.sources_failed,
            "Harvest complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::schemas::FeedResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher whose behavior is keyed off the feed URL
    #[derive(Default)]
    struct ScriptedFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FeedRequest) -> Result<FeedResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let url = request.feed_url.as_str();
            if url.contains("fail") {
                return Err(IngestionError::ApiError {
                    code: "500 Internal Server Error".to_string(),
                    message: "boom".to_string(),
                });
            }
            if url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if url.contains("panic") {
                panic!("fetcher exploded");
            }

            let articles = (0..2)
                .map(|i| RawArticle {
                    title: Some(format!("{url} #{i}")),
                    url: Some(format!("{url}/{i}")),
                    ..Default::default()
                })
                .collect();
            Ok(FeedResponse::new(articles, Some(FeedMetadata::default())))
        }
    }

    fn source(name: &str) -> Source {
        Source::new(name, format!("https://{name}.example.com"), "tech")
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let harvester = Harvester::new(Arc::new(ScriptedFetcher::default()), 10, Duration::from_millis(500));
        let sources = vec![source("alpha"), source("fail-one"), source("beta"), source("panic-one"), source("slow-one")];

        let report = harvester.harvest(&sources, RunParams::default(), "run-test").await;

        assert_eq!(report.results.len(), 5);
        assert_eq!(report.sources_failed, 3);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.all_articles.len(), 4);
        assert!(report.errors.iter().any(|e| e.message.contains("Timed out")));
        assert!(report.errors.iter().all(|e| e.source.is_some() && e.url.is_some()));
        assert_eq!(report.all_articles[0].source_id, "alpha");
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let harvester = Harvester::new(fetcher.clone(), 3, Duration::from_secs(5));
        let sources: Vec<Source> = (0..12).map(|i| source(&format!("feed{i}"))).collect();

        let report = harvester.harvest(&sources, RunParams::default(), "run-test").await;

        assert_eq!(report.sources_failed, 0);
        assert_eq!(report.all_articles.len(), 24);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_feed_groups_skip_failures() {
        let harvester = Harvester::new(Arc::new(ScriptedFetcher::default()), 10, Duration::from_secs(5));
        let sources = vec![source("alpha"), source("fail-one"), source("beta")];

        let report = harvester.harvest(&sources, RunParams::default(), "run-test").await;
        let groups = report.feed_groups();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].feed_url, "https://alpha.example.com");
        assert_eq!(groups[0].articles.len(), 2);
        assert_eq!(groups[1].feed_url, "https://beta.example.com");
    }
}
