//! SQLite-backed [`VectorStore`] implementation.
//!
//! Chunks live in a single `chunks` table with their metadata columns and an
//! optional embedding BLOB (little-endian f32 bytes); the keyword channel is
//! an FTS5 virtual table kept in lockstep with upserts and deletes. Vector
//! candidates are scored with brute-force cosine similarity in Rust after a
//! filtered scan, which is the right trade-off at documentation-corpus scale.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ChunkMetadata, EmbeddedChunk, SearchResult};

use super::{
    hybrid_blend, AggregateCache, Filter, FilterValue, SearchRequest, VectorStore,
    AGGREGATE_CACHE_TTL, UPSERT_BATCH,
};

/// Candidates fetched per channel before blending.
const CANDIDATE_K: usize = 80;

pub struct SqliteStore {
    pool: SqlitePool,
    cache: AggregateCache,
    alpha: f64,
}

impl SqliteStore {
    /// Open (or create) a database file. The schema is created by
    /// [`initialize`](VectorStore::initialize), not here.
    pub async fn open(db_path: &Path, alpha: f64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool, alpha))
    }

    /// In-memory database, primarily for tests.
    pub async fn open_memory(alpha: f64) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool, alpha))
    }

    fn from_pool(pool: SqlitePool, alpha: f64) -> Self {
        Self {
            pool,
            cache: AggregateCache::new(AGGREGATE_CACHE_TTL),
            alpha,
        }
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                version TEXT NOT NULL,
                path TEXT NOT NULL,
                product TEXT NOT NULL,
                framework TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '[]',
                heading TEXT NOT NULL DEFAULT '',
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                embedding BLOB
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_version ON chunks(version)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path, version)")
            .execute(&self.pool)
            .await?;

        // FTS5 CREATE is not idempotent natively, so we check first.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    text
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

/// Translate a [`Filter`] into SQL clauses over the `chunks` table plus the
/// bind values they expect, AND-combined by the caller.
fn filter_sql(filter: &Filter) -> (Vec<String>, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for (field, predicate) in filter.fields() {
        let column = match field.as_str() {
            "version" => "version",
            "path" => "path",
            "product" => "product",
            "framework" => "framework",
            "type" => "doc_type",
            "heading" => "heading",
            "tags" => {
                match predicate {
                    FilterValue::Equals(v) => {
                        clauses.push(
                            "EXISTS (SELECT 1 FROM json_each(chunks.tags_json) WHERE json_each.value = ?)"
                                .to_string(),
                        );
                        binds.push(v.clone());
                    }
                    FilterValue::AnyOf(vs) => {
                        let placeholders = vec!["?"; vs.len().max(1)].join(", ");
                        clauses.push(format!(
                            "EXISTS (SELECT 1 FROM json_each(chunks.tags_json) WHERE json_each.value IN ({placeholders}))"
                        ));
                        if vs.is_empty() {
                            binds.push(String::new());
                        } else {
                            binds.extend(vs.iter().cloned());
                        }
                    }
                }
                continue;
            }
            // Unknown fields never match anything.
            _ => {
                clauses.push("0 = 1".to_string());
                continue;
            }
        };

        match predicate {
            FilterValue::Equals(v) => {
                clauses.push(format!("chunks.{column} = ?"));
                binds.push(v.clone());
            }
            FilterValue::AnyOf(vs) => {
                let placeholders = vec!["?"; vs.len().max(1)].join(", ");
                clauses.push(format!("chunks.{column} IN ({placeholders})"));
                if vs.is_empty() {
                    binds.push(String::new());
                } else {
                    binds.extend(vs.iter().cloned());
                }
            }
        }
    }

    (clauses, binds)
}

/// Quote query tokens for FTS5 MATCH so user punctuation cannot produce a
/// syntax error; tokens are OR-combined to mirror the memory backend.
fn fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let id: String = row.get("id");
    let tags_json: String = row.get("tags_json");
    let chunk_index: i64 = row.get("chunk_index");
    let total_chunks: i64 = row.get("total_chunks");

    Ok(Chunk {
        id: Uuid::parse_str(&id).with_context(|| format!("Invalid chunk id: {id}"))?,
        text: row.get("text"),
        metadata: ChunkMetadata {
            document_path: row.get("path"),
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            product: row.get("product"),
            framework: row.get("framework"),
            doc_type: row.get("doc_type"),
            chunk_index: chunk_index as usize,
            total_chunks: total_chunks as usize,
            heading: row.get("heading"),
            version: row.get("version"),
        },
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        self.create_schema().await
    }

    async fn add_documents(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        for batch in chunks.chunks(UPSERT_BATCH) {
            let mut tx = self.pool.begin().await?;

            for embedded in batch {
                let chunk = &embedded.chunk;
                let meta = &chunk.metadata;
                let id = chunk.id.to_string();
                let tags_json = serde_json::to_string(&meta.tags)?;
                let blob = embedded.embedding.as_ref().map(|v| vec_to_blob(v));

                sqlx::query(
                    r#"
                    INSERT INTO chunks (id, text, version, path, product, framework,
                                        doc_type, tags_json, heading, chunk_index,
                                        total_chunks, embedding)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        text = excluded.text,
                        version = excluded.version,
                        path = excluded.path,
                        product = excluded.product,
                        framework = excluded.framework,
                        doc_type = excluded.doc_type,
                        tags_json = excluded.tags_json,
                        heading = excluded.heading,
                        chunk_index = excluded.chunk_index,
                        total_chunks = excluded.total_chunks,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(&id)
                .bind(&chunk.text)
                .bind(&meta.version)
                .bind(&meta.document_path)
                .bind(&meta.product)
                .bind(&meta.framework)
                .bind(&meta.doc_type)
                .bind(&tags_json)
                .bind(&meta.heading)
                .bind(meta.chunk_index as i64)
                .bind(meta.total_chunks as i64)
                .bind(&blob)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                    .bind(&id)
                    .bind(&chunk.text)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            debug!("Flushed {} chunks to SQLite", batch.len());
        }

        self.cache.invalidate();
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let (clauses, binds) = filter_sql(&request.filter);
        let filter_where = if clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", clauses.join(" AND "))
        };

        // Keyword channel via FTS5.
        let mut keyword: Vec<(Uuid, f64)> = Vec::new();
        if let Some(match_expr) = fts_query(&request.query) {
            let sql = format!(
                r#"
                SELECT chunks.id AS id, chunks_fts.rank AS rank
                FROM chunks_fts
                JOIN chunks ON chunks.id = chunks_fts.chunk_id
                WHERE chunks_fts MATCH ?{filter_where}
                ORDER BY rank
                LIMIT ?
                "#
            );
            let mut query = sqlx::query(&sql).bind(&match_expr);
            for bind in &binds {
                query = query.bind(bind);
            }
            let rows = query
                .bind(CANDIDATE_K.max(request.limit) as i64)
                .fetch_all(&self.pool)
                .await?;

            for row in &rows {
                let id: String = row.get("id");
                let rank: f64 = row.get("rank");
                // FTS rank is better-is-lower; negate so higher = better.
                keyword.push((Uuid::parse_str(&id)?, -rank));
            }
        }

        // Vector channel: filtered scan + cosine in Rust.
        let mut vector: Vec<(Uuid, f64)> = Vec::new();
        if let Some(query_vec) = &request.vector {
            let sql = format!(
                "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL{filter_where}"
            );
            let mut query = sqlx::query(&sql);
            for bind in &binds {
                query = query.bind(bind);
            }
            let rows = query.fetch_all(&self.pool).await?;

            for row in &rows {
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                vector.push((Uuid::parse_str(&id)?, similarity));
            }
            vector.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            vector.truncate(CANDIDATE_K.max(request.limit));
        }

        let ranked = hybrid_blend(&keyword, &vector, self.alpha);

        let mut results = Vec::new();
        for (id, score) in ranked.into_iter().take(request.limit) {
            if let Some(chunk) = self.get_document(&id).await? {
                results.push(SearchResult {
                    id,
                    text: chunk.text,
                    score: score as f32,
                    metadata: chunk.metadata,
                });
            }
        }
        Ok(results)
    }

    async fn get_document(&self, id: &Uuid) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn get_document_chunks(&self, path: &str, version: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE path = ? AND version = ? ORDER BY chunk_index ASC",
        )
        .bind(path)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_documents(&self, filter: &Filter) -> Result<u64> {
        let (clauses, binds) = filter_sql(filter);
        let where_sql = if clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let mut tx = self.pool.begin().await?;

        let fts_sql = format!(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE {where_sql})"
        );
        let mut query = sqlx::query(&fts_sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query.execute(&mut *tx).await?;

        let chunk_sql = format!("DELETE FROM chunks WHERE {where_sql}");
        let mut query = sqlx::query(&chunk_sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let removed = query.execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;

        if removed > 0 {
            self.cache.invalidate();
        }
        Ok(removed)
    }

    async fn all_versions(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.cached_versions() {
            return Ok(cached);
        }
        let versions: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT version FROM chunks ORDER BY version ASC")
                .fetch_all(&self.pool)
                .await?;
        self.cache.store_versions(versions.clone());
        Ok(versions)
    }

    async fn all_tags(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.cached_tags() {
            return Ok(cached);
        }
        let tags: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT j.value FROM chunks, json_each(chunks.tags_json) AS j ORDER BY j.value ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        self.cache.store_tags(tags.clone());
        Ok(tags)
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS chunks_fts")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS chunks")
            .execute(&self.pool)
            .await?;
        self.cache.invalidate();
        self.create_schema().await
    }
}
