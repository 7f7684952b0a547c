//! Composition root: wires store, embedder, index, query, and jobs together
//! and exposes the operations the HTTP/MCP layers consume.
//!
//! [`DocdexService::start_index_job`] runs one ingest as a detached tokio
//! task: the call returns the job id as soon as the task is scheduled, and
//! progress flows through the [`JobManager`]'s broadcast channel. Multiple
//! jobs may run concurrently; nothing serializes two runs of the same
//! version, which is a caller error this layer does not detect.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingService};
use crate::index::{IndexOptions, IndexProgress, IndexProgressReporter, IndexService};
use crate::jobs::{Job, JobEvent, JobManager, JobUpdate};
use crate::models::SearchResult;
use crate::query::{format_context, QueryService, SearchOptions};
use crate::source::DocumentSource;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

/// How often the retention sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct DocdexService {
    config: Config,
    store: Arc<dyn VectorStore>,
    index: Arc<IndexService>,
    query: QueryService,
    jobs: Arc<JobManager>,
    sweeper: JoinHandle<()>,
}

impl DocdexService {
    /// Build a service from configuration, constructing the configured store
    /// backend and embedding provider.
    pub async fn from_config(config: Config) -> Result<Self> {
        crate::config::validate(&config)?;

        let store: Arc<dyn VectorStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(MemoryStore::new(config.retrieval.hybrid_alpha)),
            _ => Arc::new(SqliteStore::open(&config.store.path, config.retrieval.hybrid_alpha).await?),
        };
        Self::with_store(config, store)
    }

    /// Build a service around an externally constructed store (tests,
    /// alternative backends).
    pub fn with_store(config: Config, store: Arc<dyn VectorStore>) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?
            .map(|provider| Arc::new(EmbeddingService::new(provider, config.embedding.batch_size)));

        let index = Arc::new(IndexService::new(
            store.clone(),
            &config.chunking,
            embedder.clone(),
        )?);
        let query = QueryService::new(store.clone(), embedder, config.retrieval.clone());
        let jobs = Arc::new(JobManager::new());

        let retention = Duration::from_secs(config.jobs.retention_hours * 3600);
        let sweeper = spawn_sweeper(jobs.clone(), SWEEP_INTERVAL, retention);

        Ok(Self {
            config,
            store,
            index,
            query,
            jobs,
            sweeper,
        })
    }

    /// Kick off an indexing run in the background and return its job id.
    ///
    /// The source is consumed by the detached task and cleaned up on every
    /// exit path. Progress, completion, and failure are observable through
    /// [`get_job`](Self::get_job) and [`subscribe`](Self::subscribe).
    pub fn start_index_job(
        &self,
        mut source: Box<dyn DocumentSource>,
        options: IndexOptions,
    ) -> Result<Uuid> {
        if options.version.trim().is_empty() {
            bail!("version is required for indexing");
        }

        let job_id = self.jobs.create_job(
            "index",
            serde_json::json!({ "version": options.version }),
        );

        let jobs = self.jobs.clone();
        let index = self.index.clone();

        tokio::spawn(async move {
            if let Err(e) = jobs.start_job(&job_id) {
                error!("Failed to start job {}: {}", job_id, e);
                return;
            }

            let reporter = JobProgressBridge {
                jobs: jobs.clone(),
                job_id,
            };
            let outcome = index
                .index_documents(source.as_mut(), &options, &reporter)
                .await;

            if let Err(e) = source.cleanup() {
                warn!("Source cleanup for job {} failed: {}", job_id, e);
            }

            match outcome {
                Ok(outcome) => {
                    let result = serde_json::json!({
                        "documentsProcessed": outcome.documents_processed,
                        "chunksIndexed": outcome.chunks_indexed,
                    });
                    if let Err(e) = jobs.complete_job(&job_id, result) {
                        error!("Failed to complete job {}: {}", job_id, e);
                    }
                }
                Err(e) => {
                    error!("Index job {} failed: {:#}", job_id, e);
                    if let Err(record_err) = jobs.fail_job(&job_id, &e) {
                        error!("Failed to record failure for job {}: {}", job_id, record_err);
                    }
                }
            }
        });

        Ok(job_id)
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.query.search(query, options).await
    }

    pub fn format_context(&self, results: &[SearchResult]) -> String {
        format_context(results)
    }

    pub fn get_job(&self, id: &Uuid) -> Option<Job> {
        self.jobs.get_job(id)
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.all_jobs()
    }

    pub fn active_jobs(&self) -> Vec<Job> {
        self.jobs.active_jobs()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    pub async fn all_versions(&self) -> Result<Vec<String>> {
        self.store.all_versions().await
    }

    pub async fn latest_version(&self) -> Result<Option<String>> {
        self.store.latest_version().await
    }

    pub async fn all_tags(&self) -> Result<Vec<String>> {
        self.store.all_tags().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }
}

impl Drop for DocdexService {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

fn spawn_sweeper(jobs: Arc<JobManager>, every: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; harmless against an empty map.
        loop {
            ticker.tick().await;
            jobs.sweep_expired(retention);
        }
    })
}

/// Bridges index-service progress into job mutations.
struct JobProgressBridge {
    jobs: Arc<JobManager>,
    job_id: Uuid,
}

impl IndexProgressReporter for JobProgressBridge {
    fn report(&self, progress: &IndexProgress) {
        let mut counters = serde_json::json!({
            "documentsProcessed": progress.documents_processed,
            "chunksIndexed": progress.chunks_indexed,
        });
        if let Some(total) = progress.total_documents {
            counters["totalDocuments"] = serde_json::json!(total);
        }

        let update = JobUpdate {
            stage: Some(progress.stage.clone()),
            progress: Some(progress.percent),
            message: Some(progress.message.clone()),
            metadata: Some(counters),
        };
        if let Err(e) = self.jobs.update_job(&self.job_id, update) {
            warn!("Dropping progress update for job {}: {}", self.job_id, e);
        }
    }
}
