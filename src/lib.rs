//! # docdex
//!
//! Version-tagged documentation indexing and hybrid semantic retrieval.
//!
//! docdex ingests documentation sets labeled with a version, splits them
//! into retrievable chunks with path-derived metadata, optionally embeds
//! them, and stores them in a pluggable vector store that serves hybrid
//! (keyword + vector) search with metadata filtering. Indexing runs execute
//! as background jobs with broadcast progress events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │   Sources   │──▶│  Processor    │──▶│ VectorStore │
//! │ dir / zip   │   │ chunk + meta │   │ sqlite/mem  │
//! └─────────────┘   └──────┬───────┘   └──────┬──────┘
//!                          │ (embeddings)      │
//!                   ┌──────┴───────┐    ┌──────┴──────┐
//!                   │ IndexService │    │ QueryService│
//!                   └──────┬───────┘    └─────────────┘
//!                          ▼
//!                   ┌──────────────┐
//!                   │  JobManager  │──▶ broadcast events
//!                   └──────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use docdex::config::Config;
//! use docdex::index::IndexOptions;
//! use docdex::query::SearchOptions;
//! use docdex::service::DocdexService;
//! use docdex::source::DirectorySource;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let service = DocdexService::from_config(config).await?;
//!
//! let source = DirectorySource::new("./docs", &["md".to_string()])?;
//! let job_id = service.start_index_job(
//!     Box::new(source),
//!     IndexOptions { version: "6.3.3".to_string(), batch_size: 100 },
//! )?;
//!
//! // ... later, once the job completes:
//! let results = service.search("column sorting", &SearchOptions::default()).await?;
//! println!("{}", service.format_context(&results));
//! # let _ = job_id;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`source`] | Document sources (directory tree, ZIP archive) |
//! | [`chunk`] | Chunking strategies |
//! | [`metadata`] | Path-derived structural metadata |
//! | [`processor`] | Document → chunks with metadata |
//! | [`embedding`] | Embedding provider abstraction and batching |
//! | [`store`] | Vector store trait, filters, SQLite and memory backends |
//! | [`index`] | Indexing orchestration and progress milestones |
//! | [`query`] | Hybrid search with version resolution and tag filtering |
//! | [`jobs`] | Job lifecycle and progress broadcasting |
//! | [`service`] | Composition root and background-job facade |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod index;
pub mod jobs;
pub mod metadata;
pub mod models;
pub mod processor;
pub mod query;
pub mod service;
pub mod source;
pub mod store;

pub use config::Config;
pub use index::{IndexOptions, IndexOutcome};
pub use jobs::{Job, JobEvent, JobManager, JobStatus};
pub use models::{Chunk, ChunkMetadata, Document, EmbeddedChunk, SearchResult};
pub use query::{format_context, SearchOptions};
pub use service::DocdexService;
pub use source::{ArchiveSource, DirectorySource, DocumentSource};
pub use store::{Filter, FilterValue, SearchRequest, VectorStore};
