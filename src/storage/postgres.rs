//! Postgres-backed document store
//!
//! All collections share one JSONB table keyed by `(collection, id)`. Merge
//! writes use `||`, which replaces top-level keys like the in-memory store.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{Direction, Document, DocumentStore, FieldFilter, Query, WriteBatch, WriteMode, MAX_BATCH_WRITES};
use crate::error::{IngestionError, Result};

const UPSERT_OVERWRITE: &str = r#"
    INSERT INTO documents (collection, id, data, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (collection, id) DO UPDATE SET
        data = EXCLUDED.data,
        updated_at = NOW()
"#;

const UPSERT_MERGE: &str = r#"
    INSERT INTO documents (collection, id, data, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (collection, id) DO UPDATE SET
        data = documents.data || EXCLUDED.data,
        updated_at = NOW()
"#;

#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Connects and makes sure the documents table exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Postgres document store initialized");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn upsert_sql(mode: WriteMode) -> &'static str {
        match mode {
            WriteMode::Overwrite => UPSERT_OVERWRITE,
            WriteMode::Merge => UPSERT_MERGE,
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row: Option<(Json<Document>,)> =
            sqlx::query_as("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(data),)| data))
    }

    async fn set(&self, collection: &str, id: &str, document: Document, mode: WriteMode) -> Result<()> {
        sqlx::query(Self::upsert_sql(mode))
            .bind(collection)
            .bind(id)
            .bind(Json(document))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestionError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<(String, Document)>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(query.collection.clone());

        for filter in &query.filters {
            match filter {
                FieldFilter::Eq(field, value) => {
                    builder.push(" AND data -> ");
                    builder.push_bind(field.clone());
                    builder.push(" = ");
                    builder.push_bind(Json(value.clone()));
                }
                FieldFilter::In(_, values) if values.is_empty() => {
                    builder.push(" AND FALSE");
                }
                FieldFilter::In(field, values) => {
                    builder.push(" AND (");
                    let mut separated = builder.separated(" OR ");
                    for value in values {
                        separated.push("data -> ");
                        separated.push_bind_unseparated(field.clone());
                        separated.push_unseparated(" = ");
                        separated.push_bind_unseparated(Json(value.clone()));
                    }
                    builder.push(")");
                }
            }
        }

        if let Some((field, direction)) = &query.order_by {
            builder.push(" AND data -> ");
            builder.push_bind(field.clone());
            builder.push(" IS NOT NULL ORDER BY data -> ");
            builder.push_bind(field.clone());
            builder.push(match direction {
                Direction::Ascending => " ASC",
                Direction::Descending => " DESC",
            });
        }

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        debug!(collection = %query.collection, "Running document query");

        let rows: Vec<(String, Json<Document>)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, Json(data))| (id, data)).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > MAX_BATCH_WRITES {
            return Err(IngestionError::BatchLimitExceeded {
                limit: MAX_BATCH_WRITES,
            });
        }

        let mut tx = self.pool.begin().await?;
        for write in batch.into_writes() {
            sqlx::query(Self::upsert_sql(write.mode))
                .bind(write.collection)
                .bind(write.id)
                .bind(Json(write.document))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
