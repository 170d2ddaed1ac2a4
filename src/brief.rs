//! Daily brief builder
//!
//! Groups a run's stored articles into sections by category, keeps the five
//! most relevant per section and persists the result to `briefs`. The output
//! is fully deterministic for a given article set.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{IngestionError, Result};
use crate::schemas::{Article, ArticleRef, Brief, BriefMeta, BriefMetrics, BriefSection, StoredArticle};
use crate::storage::{collections, from_document, to_document, DocumentStore, Query, WriteMode};

const TOP_ARTICLES_PER_SECTION: usize = 5;
const HEADLINE_SECTIONS: usize = 3;

fn section_priority(name: &str) -> u8 {
    match name {
        "Tech" => 1,
        "Business" => 2,
        "Politics" => 3,
        "Sports" => 4,
        "General" => 5,
        _ => 99,
    }
}

/// "tech" → "Tech"; no category → "General"
fn section_name(article: &Article) -> String {
    let category = article.category.as_deref().map(str::trim).unwrap_or("");
    let mut chars = category.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => "General".to_string(),
    }
}

fn build_section(name: String, mut articles: Vec<&Article>) -> BriefSection {
    // Stable sort keeps feed order among equal scores
    articles.sort_by(|a, b| {
        let a = a.relevance_score.unwrap_or(0.0);
        let b = b.relevance_score.unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    articles.truncate(TOP_ARTICLES_PER_SECTION);

    let key_points = articles
        .iter()
        .map(|article| {
            let tags: Vec<&str> = article.categories.iter().take(2).map(String::as_str).collect();
            if tags.is_empty() {
                format!("• {}", article.title)
            } else {
                format!("• {} ({})", article.title, tags.join(", "))
            }
        })
        .collect();

    let top_articles = articles
        .iter()
        .map(|article| ArticleRef {
            title: article.title.clone(),
            url: article.url.clone(),
            source_id: article.source_id.clone(),
            relevance_score: article.relevance_score.unwrap_or(0.0),
        })
        .collect();

    BriefSection {
        section_name: name,
        key_points,
        top_articles,
    }
}

/// Builds a brief for `date` from the given articles
pub fn build_brief(articles: &[Article], date: NaiveDate, run_id: Option<&str>, now: DateTime<Utc>) -> Brief {
    let date = date.format("%Y-%m-%d").to_string();

    let mut grouped: Vec<(String, Vec<&Article>)> = Vec::new();
    for article in articles {
        let name = section_name(article);
        match grouped.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, members)) => members.push(article),
            None => grouped.push((name, vec![article])),
        }
    }

    let mut sections: Vec<BriefSection> = grouped
        .into_iter()
        .map(|(name, members)| build_section(name, members))
        .collect();
    sections.sort_by_key(|s| section_priority(&s.section_name));

    let section_names: Vec<&str> = sections
        .iter()
        .take(HEADLINE_SECTIONS)
        .map(|s| s.section_name.as_str())
        .collect();
    let headline = format!(
        "Daily Intelligence Brief - {} ({} articles across {})",
        date,
        articles.len(),
        section_names.join(", ")
    );

    let mut top_sources: BTreeMap<String, usize> = BTreeMap::new();
    for article in articles.iter().filter(|a| !a.source_id.is_empty()) {
        *top_sources.entry(article.source_id.clone()).or_default() += 1;
    }

    Brief {
        brief_id: format!("brief-{date}"),
        date,
        headline,
        metrics: BriefMetrics {
            article_count: articles.len(),
            top_sources,
        },
        meta: BriefMeta {
            article_count: articles.len(),
            section_count: sections.len(),
            run_id: run_id.map(str::to_string),
            created_at: now,
        },
        sections,
    }
}

pub struct BriefBuilder {
    store: Arc<dyn DocumentStore>,
}

impl BriefBuilder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Articles stored by a run
    pub async fn articles_for_run(&self, run_id: &str) -> Result<Vec<Article>> {
        let query = Query::collection(collections::ARTICLES).where_eq("run_id", run_id);
        self.store
            .query(&query)
            .await?
            .into_iter()
            .map(|(_, doc)| from_document::<StoredArticle>(doc).map(|stored| stored.article))
            .collect()
    }

    /// Builds the brief for a run and persists it, replacing any brief for the same date
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn build_and_store(&self, run_id: &str, date: NaiveDate) -> Result<Brief> {
        let articles = self.articles_for_run(run_id).await?;
        if articles.is_empty() {
            return Err(IngestionError::ValidationError(format!(
                "no stored articles for run {run_id}"
            )));
        }

        let brief = build_brief(&articles, date, Some(run_id), Utc::now());
        self.store
            .set(collections::BRIEFS, &brief.brief_id, to_document(&brief)?, WriteMode::Overwrite)
            .await?;

        info!(
            brief_id = %brief.brief_id,
            article_count = brief.meta.article_count,
            section_count = brief.meta.section_count,
            "Brief stored"
        );
        Ok(brief)
    }
}
