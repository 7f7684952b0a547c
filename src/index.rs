//! Index service: orchestrates Source → Processor → Embedder → Store for one
//! version-tagged ingest run.
//!
//! Re-indexing an existing version is a whole-version replace: every chunk
//! bearing that version is deleted before the first write. There is no
//! incremental append path and no partial commit on failure; an embedding
//! or store error aborts the run and propagates to the caller, which owns
//! job bookkeeping and source cleanup.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingService;
use crate::models::{Chunk, EmbeddedChunk};
use crate::processor::DocumentProcessor;
use crate::source::DocumentSource;
use crate::store::VectorStore;

/// Options for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Version label stamped onto every chunk. Required.
    pub version: String,
    /// Chunks buffered before each store write.
    pub batch_size: usize,
}

/// Counters returned from a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub documents_processed: u64,
    pub chunks_indexed: u64,
}

/// A progress snapshot emitted at defined milestones.
///
/// `percent` is 0 at initialization, 5 while clearing an existing version,
/// 10–15 while enumerating the source, 20–95 linear in documents processed
/// (held at 20 when the source total is unknown), 98 at cleanup, and 100 on
/// completion.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub stage: String,
    pub percent: u8,
    pub message: String,
    pub documents_processed: u64,
    pub chunks_indexed: u64,
    pub total_documents: Option<u64>,
}

/// Receives progress snapshots. Implementations must tolerate being called
/// from the indexing task's context.
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, progress: &IndexProgress);
}

/// No-op reporter for callers that do not track progress.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _progress: &IndexProgress) {}
}

pub struct IndexService {
    store: Arc<dyn VectorStore>,
    processor: DocumentProcessor,
    embedder: Option<Arc<EmbeddingService>>,
}

impl IndexService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        chunking: &ChunkingConfig,
        embedder: Option<Arc<EmbeddingService>>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            processor: DocumentProcessor::new(chunking)?,
            embedder,
        })
    }

    /// Run one ingest: stream the source through the processor and flush
    /// version-stamped chunks to the store in batches.
    pub async fn index_documents(
        &self,
        source: &mut dyn DocumentSource,
        options: &IndexOptions,
        reporter: &dyn IndexProgressReporter,
    ) -> Result<IndexOutcome> {
        if options.version.trim().is_empty() {
            bail!("version is required for indexing");
        }
        let version = options.version.as_str();
        let batch_size = options.batch_size.max(1);

        let mut progress = IndexProgress {
            stage: "initializing".to_string(),
            percent: 0,
            message: format!("Indexing version {version}"),
            documents_processed: 0,
            chunks_indexed: 0,
            total_documents: None,
        };
        reporter.report(&progress);

        self.store.initialize().await?;

        if self.store.all_versions().await?.iter().any(|v| v == version) {
            progress.stage = "clearing".to_string();
            progress.percent = 5;
            progress.message = format!("Removing existing chunks for version {version}");
            reporter.report(&progress);

            let removed = self.store.delete_by_version(version).await?;
            info!("Replaced version {}: removed {} existing chunks", version, removed);
        }

        progress.stage = "enumerating".to_string();
        progress.percent = 10;
        progress.message = "Enumerating documents".to_string();
        reporter.report(&progress);

        let total = source.document_count();
        progress.percent = 15;
        progress.total_documents = total;
        progress.message = match total {
            Some(n) => format!("{n} documents to index"),
            None => "Document count unknown".to_string(),
        };
        reporter.report(&progress);

        let mut outcome = IndexOutcome::default();
        let mut buffer: Vec<Chunk> = Vec::new();

        progress.stage = "indexing".to_string();

        while let Some(doc) = source.next_document().await? {
            let mut chunks = match self.processor.process_document(&doc) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Skipping document {}: {}", doc.path, e);
                    continue;
                }
            };

            for chunk in &mut chunks {
                chunk.metadata.version = version.to_string();
                if !chunk.metadata.tags.iter().any(|t| t == version) {
                    chunk.metadata.tags.push(version.to_string());
                }
            }

            // One increment per source document, not per chunk.
            outcome.documents_processed += chunks
                .iter()
                .filter(|c| c.metadata.chunk_index == 0)
                .count() as u64;
            buffer.extend(chunks);

            if buffer.len() >= batch_size {
                outcome.chunks_indexed += self.flush(&mut buffer).await?;
            }

            progress.percent = match total {
                Some(n) if n > 0 => {
                    let linear = 20.0 + 75.0 * (outcome.documents_processed as f64 / n as f64);
                    (linear as u8).min(95)
                }
                _ => 20,
            };
            progress.documents_processed = outcome.documents_processed;
            progress.chunks_indexed = outcome.chunks_indexed;
            progress.message = format!("Indexed {} documents", outcome.documents_processed);
            reporter.report(&progress);
        }

        outcome.chunks_indexed += self.flush(&mut buffer).await?;

        progress.stage = "cleanup".to_string();
        progress.percent = 98;
        progress.chunks_indexed = outcome.chunks_indexed;
        progress.message = "Finalizing".to_string();
        reporter.report(&progress);

        progress.stage = "completed".to_string();
        progress.percent = 100;
        progress.message = format!(
            "Indexed {} documents ({} chunks) for version {version}",
            outcome.documents_processed, outcome.chunks_indexed
        );
        reporter.report(&progress);

        info!(
            "Index run for version {} complete: {} documents, {} chunks",
            version, outcome.documents_processed, outcome.chunks_indexed
        );
        Ok(outcome)
    }

    async fn flush(&self, buffer: &mut Vec<Chunk>) -> Result<u64> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let chunks = std::mem::take(buffer);
        let count = chunks.len() as u64;

        let embedded: Vec<EmbeddedChunk> = match &self.embedder {
            Some(embedder) => embedder.embed_chunks(chunks).await?,
            None => chunks
                .into_iter()
                .map(|chunk| EmbeddedChunk {
                    chunk,
                    embedding: None,
                })
                .collect(),
        };

        self.store.add_documents(&embedded).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::store::memory::MemoryStore;
    use crate::store::{Filter, SearchRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct VecSource {
        docs: std::collections::VecDeque<Document>,
        total: u64,
        report_count: bool,
    }

    impl VecSource {
        fn new(docs: Vec<Document>) -> Self {
            Self {
                total: docs.len() as u64,
                docs: docs.into(),
                report_count: true,
            }
        }

        fn without_count(mut self) -> Self {
            self.report_count = false;
            self
        }
    }

    #[async_trait]
    impl DocumentSource for VecSource {
        async fn next_document(&mut self) -> Result<Option<Document>> {
            Ok(self.docs.pop_front())
        }

        fn document_count(&self) -> Option<u64> {
            self.report_count.then_some(self.total)
        }

        fn cleanup(&mut self) -> Result<()> {
            self.docs.clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        snapshots: Mutex<Vec<IndexProgress>>,
    }

    impl IndexProgressReporter for RecordingReporter {
        fn report(&self, progress: &IndexProgress) {
            self.snapshots.lock().unwrap().push(progress.clone());
        }
    }

    fn service(store: Arc<dyn VectorStore>) -> IndexService {
        IndexService::new(store, &ChunkingConfig::default(), None).unwrap()
    }

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| {
                Document::new(
                    format!("grid/guides/doc{i}.md"),
                    format!("# Doc {i}\nBody text number {i}.\n"),
                )
            })
            .collect()
    }

    fn options(version: &str) -> IndexOptions {
        IndexOptions {
            version: version.to_string(),
            batch_size: 2,
        }
    }

    #[tokio::test]
    async fn rejects_missing_version() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store);
        let mut source = VecSource::new(docs(1));
        let err = service
            .index_documents(&mut source, &options("  "), &NoProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("version is required"));
    }

    #[tokio::test]
    async fn stamps_version_into_metadata_and_tags() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());
        let mut source = VecSource::new(docs(2));

        let outcome = service
            .index_documents(&mut source, &options("6.3.3"), &NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.documents_processed, 2);
        assert_eq!(outcome.chunks_indexed, 2);

        let results = store
            .search(&SearchRequest {
                query: "Body".to_string(),
                vector: None,
                limit: 10,
                filter: Filter::new().equals("version", "6.3.3"),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.metadata.version, "6.3.3");
            assert!(result.metadata.tags.contains(&"6.3.3".to_string()));
        }
    }

    #[tokio::test]
    async fn reindex_replaces_the_whole_version() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());

        let mut source = VecSource::new(docs(3));
        let first = service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();

        let mut source = VecSource::new(docs(3));
        let second = service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();

        assert_eq!(first.chunks_indexed, second.chunks_indexed);

        // Chunk count after two identical runs equals a single run's.
        let results = store
            .search(&SearchRequest {
                query: "Body".to_string(),
                vector: None,
                limit: 100,
                filter: Filter::new().equals("version", "1.0"),
            })
            .await
            .unwrap();
        assert_eq!(results.len() as u64, first.chunks_indexed);
    }

    #[tokio::test]
    async fn other_versions_survive_a_reindex() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());

        let mut source = VecSource::new(docs(2));
        service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();
        let mut source = VecSource::new(docs(2));
        service
            .index_documents(&mut source, &options("2.0"), &NoProgress)
            .await
            .unwrap();
        let mut source = VecSource::new(docs(2));
        service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();

        let versions = store.all_versions().await.unwrap();
        assert_eq!(versions, vec!["1.0".to_string(), "2.0".to_string()]);
    }

    #[tokio::test]
    async fn progress_hits_the_defined_milestones() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());
        let reporter = RecordingReporter::default();

        // Pre-seed the version so the clearing milestone fires.
        let mut source = VecSource::new(docs(1));
        service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();

        let mut source = VecSource::new(docs(4));
        service
            .index_documents(&mut source, &options("1.0"), &reporter)
            .await
            .unwrap();

        let snapshots = reporter.snapshots.lock().unwrap();
        let percents: Vec<u8> = snapshots.iter().map(|p| p.percent).collect();

        assert_eq!(percents.first(), Some(&0));
        assert!(percents.contains(&5), "clearing milestone missing: {percents:?}");
        assert!(percents.contains(&10));
        assert!(percents.contains(&15));
        assert!(percents.contains(&98));
        assert_eq!(percents.last(), Some(&100));

        // Monotonic, and the streaming phase stays within 20..=95.
        for pair in percents.windows(2) {
            assert!(pair[0] <= pair[1], "progress went backwards: {percents:?}");
        }
        for snapshot in snapshots.iter().filter(|p| p.stage == "indexing") {
            assert!(snapshot.percent >= 20 && snapshot.percent <= 95);
        }

        let last = snapshots.last().unwrap();
        assert_eq!(last.documents_processed, 4);
        assert_eq!(last.total_documents, Some(4));
    }

    #[tokio::test]
    async fn unknown_totals_hold_at_twenty_percent() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());
        let reporter = RecordingReporter::default();

        let mut source = VecSource::new(docs(3)).without_count();
        service
            .index_documents(&mut source, &options("1.0"), &reporter)
            .await
            .unwrap();

        let snapshots = reporter.snapshots.lock().unwrap();
        for snapshot in snapshots.iter().filter(|p| p.stage == "indexing") {
            assert_eq!(snapshot.percent, 20);
        }
    }

    #[tokio::test]
    async fn multi_chunk_documents_count_once() {
        let store = Arc::new(MemoryStore::default());
        let service = service(store.clone());

        let doc = Document::new(
            "grid/guides/big.md",
            "# One\nfirst section\n\n# Two\nsecond section\n\n# Three\nthird section\n",
        );
        let mut source = VecSource::new(vec![doc]);
        let outcome = service
            .index_documents(&mut source, &options("1.0"), &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.documents_processed, 1);
        assert_eq!(outcome.chunks_indexed, 3);
    }
}
