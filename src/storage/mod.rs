//! Document store abstraction
//!
//! Keyed JSON documents grouped in collections, with get / set / update,
//! filtered + ordered + limited queries and capped batch writes. Every
//! component receives an `Arc<dyn DocumentStore>` at construction time.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::{IngestionError, Result};

pub use memory::MemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

/// A stored document: a JSON object
pub type Document = Map<String, Value>;

/// Per-batch write cap
pub const MAX_BATCH_WRITES: usize = 500;

/// Collection names
pub mod collections {
    pub const INGESTION_RUNS: &str = "ingestion_runs";
    pub const ARTICLES: &str = "articles";
    pub const AUTHORS: &str = "authors";
    pub const BRIEFS: &str = "briefs";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document
    Overwrite,
    /// Merge top-level fields into the existing document (create if absent)
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl FieldFilter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            FieldFilter::Eq(field, expected) => document.get(field) == Some(expected),
            FieldFilter::In(field, allowed) => document
                .get(field)
                .map(|value| allowed.contains(value))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Filtered, ordered, limited query over one collection.
///
/// Documents lacking the `order_by` field are excluded from ordered results.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: vec![],
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter::Eq(field.into(), value.into()));
        self
    }

    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(FieldFilter::In(field.into(), values));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One write inside a batch
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub collection: String,
    pub id: String,
    pub document: Document,
    pub mode: WriteMode,
}

/// Multi-document write, committed atomically by the backend
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write; fails once the batch holds `MAX_BATCH_WRITES`
    pub fn set(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        document: Document,
        mode: WriteMode,
    ) -> Result<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(IngestionError::BatchLimitExceeded {
                limit: MAX_BATCH_WRITES,
            });
        }
        self.writes.push(BatchWrite {
            collection: collection.into(),
            id: id.into(),
            document,
            mode,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<BatchWrite> {
        self.writes
    }
}

/// Trait for document store backends
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Writes one document, replacing or merging
    async fn set(&self, collection: &str, id: &str, document: Document, mode: WriteMode) -> Result<()>;

    /// Merges fields into an existing document; `NotFound` if absent
    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()>;

    /// Runs a query, returning `(id, document)` pairs
    async fn query(&self, query: &Query) -> Result<Vec<(String, Document)>>;

    /// Commits a batch of writes
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}

/// Serializes a schema struct into a document
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(IngestionError::ValidationError(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserializes a document into a schema struct
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Top-level field merge, the same semantics every backend applies
pub fn merge_into(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

/// Total order over JSON values used for `order_by`
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn type_rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Builds the store selected by configuration
pub async fn connect(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    if config.is_postgres() {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| IngestionError::StorageError("DATABASE_URL not set".to_string()))?;
        info!("Connecting to Postgres document store...");
        let store = PostgresDocumentStore::connect(url).await?;
        Ok(Arc::new(store))
    } else {
        info!("Using in-memory document store");
        Ok(Arc::new(MemoryDocumentStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filters() {
        let document = doc(json!({ "status": "running", "trigger": "manual" }));

        assert!(FieldFilter::Eq("status".into(), json!("running")).matches(&document));
        assert!(!FieldFilter::Eq("status".into(), json!("failed")).matches(&document));
        assert!(FieldFilter::In("status".into(), vec![json!("accepted"), json!("running")]).matches(&document));
        assert!(!FieldFilter::In("missing".into(), vec![json!("x")]).matches(&document));
    }

    #[test]
    fn test_batch_cap() {
        let mut batch = WriteBatch::new();
        for i in 0..MAX_BATCH_WRITES {
            batch
                .set("articles", format!("doc-{i}"), Document::new(), WriteMode::Merge)
                .unwrap();
        }

        let overflow = batch.set("articles", "one-too-many", Document::new(), WriteMode::Merge);
        assert!(matches!(overflow, Err(IngestionError::BatchLimitExceeded { limit: 500 })));
        assert_eq!(batch.len(), MAX_BATCH_WRITES);
    }

    #[test]
    fn test_merge_into_overwrites_top_level_only() {
        let mut target = doc(json!({ "a": 1, "stats": { "x": 1 } }));
        merge_into(&mut target, doc(json!({ "b": 2, "stats": { "y": 2 } })));

        assert_eq!(Value::Object(target), json!({ "a": 1, "b": 2, "stats": { "y": 2 } }));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!("2024-01-01"), &json!("2024-02-01")), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!(2.5)), Ordering::Greater);
        assert_eq!(compare_values(&json!(1), &json!("1")), Ordering::Less);
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        assert!(to_document(&42).is_err());
        assert!(to_document(&json!({ "ok": true })).is_ok());
    }
}
