//! Brief Schema
//!
//! Daily executive brief in the `briefs` collection, keyed `brief-YYYY-MM-DD`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Brief {
    pub brief_id: String,
    pub date: String,
    pub headline: String,
    pub sections: Vec<BriefSection>,
    pub metrics: BriefMetrics,
    pub meta: BriefMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BriefSection {
    pub section_name: String,
    pub key_points: Vec<String>,
    pub top_articles: Vec<ArticleRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleRef {
    pub title: String,
    pub url: String,
    pub source_id: String,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BriefMetrics {
    pub article_count: usize,
    pub top_sources: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BriefMeta {
    pub article_count: usize,
    pub section_count: usize,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}
