//! Document processor: chunking plus structural metadata.
//!
//! Turns one [`Document`] into ordered [`Chunk`]s. The processor is
//! version-agnostic; the index service stamps the version onto each chunk
//! afterwards.

use anyhow::Result;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::config::ChunkingConfig;
use crate::metadata;
use crate::models::{Chunk, ChunkMetadata, Document};

pub struct DocumentProcessor {
    chunker: Chunker,
    include_root_segment: bool,
}

impl DocumentProcessor {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(config)?,
            include_root_segment: config.include_root_segment,
        })
    }

    /// Split a document into chunks with contiguous `chunk_index` values and
    /// a shared `total_chunks`. Metadata derivation is total; the only
    /// failure mode is pathological content the chunker cannot place, and
    /// callers are expected to skip such documents rather than abort.
    pub fn process_document(&self, doc: &Document) -> Result<Vec<Chunk>> {
        let pieces = self.chunker.chunk(&doc.content);
        let total = pieces.len();

        let tags = metadata::extract_tags(&doc.path, self.include_root_segment);
        let product = metadata::extract_product(&doc.path);
        let framework = metadata::extract_framework(&doc.path);
        let doc_type = metadata::extract_doc_type(&doc.path);

        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| Chunk {
                id: Uuid::new_v4(),
                text: piece.text,
                metadata: ChunkMetadata {
                    document_path: doc.path.clone(),
                    tags: tags.clone(),
                    product: product.clone(),
                    framework: framework.clone(),
                    doc_type: doc_type.clone(),
                    chunk_index: i,
                    total_chunks: total,
                    heading: piece.heading,
                    version: String::new(),
                },
            })
            .collect();

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(strategy: &str, max_size: usize, overlap: usize) -> DocumentProcessor {
        DocumentProcessor::new(&ChunkingConfig {
            strategy: strategy.to_string(),
            max_chunk_size: max_size,
            overlap,
            include_root_segment: false,
        })
        .unwrap()
    }

    #[test]
    fn chunk_indices_are_contiguous_and_share_total() {
        let doc = Document::new(
            "grid/guides/columns.md",
            "# One\nbody one\n\n# Two\nbody two\n\n# Three\nbody three\n",
        );
        let chunks = processor("headers", 500, 0).process_document(&doc).unwrap();

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, 3);
            assert_eq!(chunk.metadata.document_path, "grid/guides/columns.md");
        }
    }

    #[test]
    fn metadata_is_derived_from_the_path() {
        let doc = Document::new("grid/react/api/Grid.md", "API reference body.");
        let chunks = processor("none", 500, 0).process_document(&doc).unwrap();

        let meta = &chunks[0].metadata;
        assert_eq!(meta.product, "grid");
        assert_eq!(meta.framework, "react");
        assert_eq!(meta.doc_type, "api");
        assert_eq!(meta.tags, vec!["react", "api"]);
        assert!(meta.version.is_empty());
    }

    #[test]
    fn zero_overlap_size_chunks_reconstruct_document() {
        let content: String = (0..30)
            .map(|i| format!("Numbered sentence {i} in the body. "))
            .collect();
        let doc = Document::new("misc/long.md", content.clone());
        let chunks = processor("size", 150, 0).process_document(&doc).unwrap();

        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn every_chunk_gets_a_fresh_id() {
        let doc = Document::new("a/b.md", "# H\ntext\n\n# H2\nmore\n");
        let chunks = processor("headers", 500, 0).process_document(&doc).unwrap();
        assert_ne!(chunks[0].id, chunks[1].id);
    }
}
