//! Core data models used throughout docdex.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw document produced by a [`DocumentSource`](crate::source::DocumentSource)
/// before chunking. Consumed exactly once by the processor.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path of the document relative to its source root (always `/`-separated).
    pub path: String,
    /// Full text content.
    pub content: String,
    /// Source-specific metadata (file size, archive entry name, ...).
    pub source_metadata: serde_json::Value,
}

impl Document {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            source_metadata: serde_json::json!({}),
        }
    }
}

/// Structural metadata attached to every chunk.
///
/// `version` is stamped by the index service, never by the processor, and is
/// mirrored into `tags` so tag-based and version-based filtering compose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the document this chunk was cut from.
    pub document_path: String,
    /// Path-derived tags, order-preserving and duplicate-free.
    pub tags: Vec<String>,
    /// Product the document belongs to (e.g. `"grid"`); `"core"` when unknown.
    pub product: String,
    /// Framework flavor (e.g. `"react"`); `"vanilla"` when unknown.
    pub framework: String,
    /// Document kind: `"guide"`, `"api"`, `"example"`, or `"concept"`.
    pub doc_type: String,
    /// Position of this chunk within its document, `0..total_chunks`.
    pub chunk_index: usize,
    /// Number of chunks the document was split into; identical across them.
    pub total_chunks: usize,
    /// Section heading this chunk belongs to; empty for heading-less content.
    pub heading: String,
    /// Version label of the ingest run that produced this chunk.
    pub version: String,
}

/// One retrievable unit of a document after splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk paired with its embedding vector.
///
/// `embedding` is `None` when the store computes vectors itself or when the
/// pipeline runs keyword-only (no embedding provider configured).
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

/// A ranked hit returned from [`VectorStore::search`](crate::store::VectorStore::search).
///
/// `score` is the store's hybrid similarity, already normalized to `[0, 1]`
/// with 1 best. Callers display `1 - score` as a distance but never rescale
/// or re-rank by anything else.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}
