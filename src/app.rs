//! Service wiring shared by the HTTP server and the CLI

use std::sync::Arc;
use tracing::info;

use crate::article_store::{ArticleSink, ArticleStore};
use crate::author::{AuthorSink, AuthorUpserter};
use crate::brief::BriefBuilder;
use crate::catalog::{FileSourceCatalog, SourceCatalog};
use crate::config::Config;
use crate::error::Result;
use crate::feeds::{FeedFetcher, HttpFeedFetcher};
use crate::harvester::Harvester;
use crate::http_client::{HttpClientConfig, ResilientHttpClient};
use crate::orchestrator::{PipelineSettings, RunOrchestrator};
use crate::registry::RunRegistry;
use crate::storage::{self, DocumentStore};

/// Every long-lived component of the service, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub catalog: Arc<dyn SourceCatalog>,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub articles: Arc<dyn ArticleSink>,
    pub authors: Arc<dyn AuthorSink>,
    pub registry: Arc<RunRegistry>,
    pub orchestrator: Arc<RunOrchestrator>,
    pub briefs: Arc<BriefBuilder>,
    pub metrics_enabled: bool,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Connects the configured store and builds the rest on top of it
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = storage::connect(config).await?;
        let catalog: Arc<dyn SourceCatalog> = Arc::new(FileSourceCatalog::new(config.sources_path.clone()));
        let client = ResilientHttpClient::new(HttpClientConfig::from_config(config))?;
        let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher::new(client));
        Ok(Self::assemble(config, store, catalog, fetcher))
    }

    /// Builds the service from explicit store, catalog and fetcher
    pub fn assemble(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        catalog: Arc<dyn SourceCatalog>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        // Run-level chunking is the orchestrator's; the sink commits up to the batch cap
        let articles: Arc<dyn ArticleSink> = Arc::new(ArticleStore::new(store.clone()));
        let authors: Arc<dyn AuthorSink> = Arc::new(AuthorUpserter::new(store.clone()));
        let registry = Arc::new(RunRegistry::from_config(store.clone(), config));
        let harvester = Arc::new(Harvester::from_config(fetcher.clone(), config));

        let orchestrator = Arc::new(RunOrchestrator::new(
            registry.clone(),
            catalog.clone(),
            harvester,
            articles.clone(),
            authors.clone(),
            PipelineSettings::from_config(config),
        ));

        info!(
            store = store.backend(),
            max_concurrent_fetches = config.max_concurrent_fetches,
            "Ingestion service assembled"
        );

        Self {
            briefs: Arc::new(BriefBuilder::new(store.clone())),
            store,
            catalog,
            fetcher,
            articles,
            authors,
            registry,
            orchestrator,
            metrics_enabled: config.metrics_enabled,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticSourceCatalog;
    use crate::schemas::{Article, RawArticle, Source, StoreArticlesRequest};
    use crate::storage::{collections, MemoryDocumentStore};

    #[tokio::test]
    async fn test_sink_commits_large_request_in_one_batch() {
        let memory = Arc::new(MemoryDocumentStore::new());
        let client = ResilientHttpClient::new(HttpClientConfig::default()).unwrap();
        let state = AppState::assemble(
            &Config::default(),
            memory.clone(),
            Arc::new(StaticSourceCatalog::new(vec![])),
            Arc::new(HttpFeedFetcher::new(client)),
        );

        let source = Source::new("Wire", "https://wire.example.com/rss", "tech");
        let articles: Vec<Article> = (0..450)
            .map(|i| {
                Article::from_raw(
                    &RawArticle {
                        title: Some(format!("Story {i}")),
                        url: Some(format!("https://wire.example.com/story/{i}")),
                        ..Default::default()
                    },
                    &source,
                )
            })
            .collect();

        let response = state
            .articles
            .store_articles(StoreArticlesRequest {
                run_id: "run-wiring".to_string(),
                articles,
            })
            .await
            .unwrap();

        assert_eq!(response.stored_count, 450);
        assert_eq!(response.storage_stats.batch_count, 1);
        assert_eq!(memory.count(collections::ARTICLES), 450);
    }
}
