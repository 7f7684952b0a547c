//! In-memory [`VectorStore`] implementation for tests and small corpora.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; the keyword channel counts query-token
//! occurrences. Both channels feed the shared min-max + alpha blend, so
//! scoring behaves like the SQLite backend's.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, EmbeddedChunk, SearchResult};

use super::{
    hybrid_blend, AggregateCache, Filter, SearchRequest, VectorStore, AGGREGATE_CACHE_TTL,
};

struct StoredChunk {
    chunk: Chunk,
    vector: Option<Vec<f32>>,
}

pub struct MemoryStore {
    rows: RwLock<Vec<StoredChunk>>,
    cache: AggregateCache,
    alpha: f64,
}

impl MemoryStore {
    pub fn new(alpha: f64) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            cache: AggregateCache::new(AGGREGATE_CACHE_TTL),
            alpha,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(0.6)
    }
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn keyword_score(text: &str, tokens: &[String]) -> f64 {
    let lower = text.to_lowercase();
    tokens
        .iter()
        .map(|token| lower.matches(token.as_str()).count() as f64)
        .sum()
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn add_documents(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        for embedded in chunks {
            rows.retain(|row| row.chunk.id != embedded.chunk.id);
            rows.push(StoredChunk {
                chunk: embedded.chunk.clone(),
                vector: embedded.embedding.clone(),
            });
        }
        self.cache.invalidate();
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let rows = self.rows.read().unwrap();
        let tokens = query_tokens(&request.query);

        let mut keyword: Vec<(Uuid, f64)> = Vec::new();
        let mut vector: Vec<(Uuid, f64)> = Vec::new();

        for row in rows.iter() {
            if !request.filter.matches(&row.chunk.metadata) {
                continue;
            }
            if !tokens.is_empty() {
                let score = keyword_score(&row.chunk.text, &tokens);
                if score > 0.0 {
                    keyword.push((row.chunk.id, score));
                }
            }
            if let (Some(query_vec), Some(row_vec)) = (&request.vector, &row.vector) {
                vector.push((row.chunk.id, cosine_similarity(query_vec, row_vec) as f64));
            }
        }

        let ranked = hybrid_blend(&keyword, &vector, self.alpha);

        let results = ranked
            .into_iter()
            .take(request.limit)
            .filter_map(|(id, score)| {
                rows.iter().find(|row| row.chunk.id == id).map(|row| SearchResult {
                    id,
                    text: row.chunk.text.clone(),
                    score: score as f32,
                    metadata: row.chunk.metadata.clone(),
                })
            })
            .collect();

        Ok(results)
    }

    async fn get_document(&self, id: &Uuid) -> Result<Option<Chunk>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .iter()
            .find(|row| row.chunk.id == *id)
            .map(|row| row.chunk.clone()))
    }

    async fn get_document_chunks(&self, path: &str, version: &str) -> Result<Vec<Chunk>> {
        let rows = self.rows.read().unwrap();
        let mut chunks: Vec<Chunk> = rows
            .iter()
            .filter(|row| {
                row.chunk.metadata.document_path == path && row.chunk.metadata.version == version
            })
            .map(|row| row.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.metadata.chunk_index);
        Ok(chunks)
    }

    async fn delete_documents(&self, filter: &Filter) -> Result<u64> {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|row| !filter.matches(&row.chunk.metadata));
        let removed = (before - rows.len()) as u64;
        if removed > 0 {
            self.cache.invalidate();
        }
        Ok(removed)
    }

    async fn all_versions(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.cached_versions() {
            return Ok(cached);
        }
        let rows = self.rows.read().unwrap();
        let mut versions: Vec<String> = rows
            .iter()
            .map(|row| row.chunk.metadata.version.clone())
            .collect();
        versions.sort();
        versions.dedup();
        self.cache.store_versions(versions.clone());
        Ok(versions)
    }

    async fn all_tags(&self) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.cached_tags() {
            return Ok(cached);
        }
        let rows = self.rows.read().unwrap();
        let mut tags: Vec<String> = rows
            .iter()
            .flat_map(|row| row.chunk.metadata.tags.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        self.cache.store_tags(tags.clone());
        Ok(tags)
    }

    async fn clear_all(&self) -> Result<()> {
        self.rows.write().unwrap().clear();
        self.cache.invalidate();
        Ok(())
    }
}
