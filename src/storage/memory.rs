//! In-memory document store (development and tests)

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{compare_values, merge_into, Direction, Document, DocumentStore, Query, WriteBatch, WriteMode, MAX_BATCH_WRITES};
use crate::error::{IngestionError, Result};

type Collection = BTreeMap<String, Document>;

/// Collections of documents held behind a single lock
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn apply(collections: &mut HashMap<String, Collection>, collection: &str, id: &str, document: Document, mode: WriteMode) {
        let docs = collections.entry(collection.to_string()).or_default();
        match (mode, docs.get_mut(id)) {
            (WriteMode::Merge, Some(existing)) => merge_into(existing, document),
            _ => {
                docs.insert(id.to_string(), document);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, document: Document, mode: WriteMode) -> Result<()> {
        let mut collections = self.collections.write();
        Self::apply(&mut collections, collection, id, document, mode);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let mut collections = self.collections.write();
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| IngestionError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        merge_into(existing, fields);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<(String, Document)>> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(vec![]);
        };

        let mut matched: Vec<(String, Document)> = docs
            .iter()
            .filter(|(_, doc)| query.filters.iter().all(|f| f.matches(doc)))
            .filter(|(_, doc)| match &query.order_by {
                Some((field, _)) => doc.contains_key(field),
                None => true,
            })
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();

        if let Some((field, direction)) = &query.order_by {
            matched.sort_by(|(_, a), (_, b)| {
                let ordering = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => std::cmp::Ordering::Equal,
                };
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > MAX_BATCH_WRITES {
            return Err(IngestionError::BatchLimitExceeded {
                limit: MAX_BATCH_WRITES,
            });
        }

        let mut collections = self.collections.write();
        for write in batch.into_writes() {
            Self::apply(&mut collections, &write.collection, &write.id, write.document, write.mode);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
