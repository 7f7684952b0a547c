//! Asynchronous job lifecycle tracking and progress broadcasting.
//!
//! A [`JobManager`] is an owned registry; construct one per composition
//! root (tests build a fresh one per case). Jobs move through
//! `pending → running → {completed | failed}`; transitions out of a terminal
//! state are rejected, and a failed job stays queryable for diagnostics
//! until the retention sweep removes it.
//!
//! Every mutation stamps `updated_at` and broadcasts a [`JobEvent`] snapshot
//! on a `tokio::sync::broadcast` channel. Any number of subscribers may
//! attach; one detaching does not affect delivery to the others. A per-job
//! view is the same stream filtered by `id`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Error detail kept on a failed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub message: String,
    /// Full error chain, for diagnostics.
    pub stack: String,
}

impl JobFailure {
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            stack: format!("{error:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

/// Partial mutation applied through [`JobManager::update_job`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub stage: Option<String>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    /// Object whose keys are merged into the job's metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Broadcast snapshot, shaped for live-update transports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_indexed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl JobEvent {
    fn from_job(job: &Job) -> Self {
        let meta_u64 =
            |key: &str| job.metadata.get(key).and_then(serde_json::Value::as_u64);
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            status: job.status,
            stage: job.stage.clone(),
            progress: job.progress,
            message: job.message.clone(),
            version: job
                .metadata
                .get("version")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            documents_processed: meta_u64("documentsProcessed"),
            chunks_indexed: meta_u64("chunksIndexed"),
            total_documents: meta_u64("totalDocuments"),
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, Job>>,
    events: broadcast::Sender<JobEvent>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to all job progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn emit(&self, job: &Job) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(JobEvent::from_job(job));
    }

    pub fn create_job(&self, job_type: &str, metadata: serde_json::Value) -> Uuid {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            stage: "pending".to_string(),
            progress: 0,
            message: String::new(),
            metadata,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
        };
        let id = job.id;
        self.emit(&job);
        self.jobs.write().unwrap().insert(id, job);
        debug!("Created {} job {}", job_type, id);
        id
    }

    fn mutate(&self, id: &Uuid, f: impl FnOnce(&mut Job) -> Result<()>) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = match jobs.get_mut(id) {
            Some(job) => job,
            None => bail!("Unknown job: {}", id),
        };
        f(job)?;
        job.updated_at = Utc::now();
        self.emit(job);
        Ok(())
    }

    pub fn update_job(&self, id: &Uuid, update: JobUpdate) -> Result<()> {
        self.mutate(id, |job| {
            if job.status.is_terminal() {
                bail!("Job {} is terminal and cannot be updated", job.id);
            }
            if let Some(stage) = update.stage {
                job.stage = stage;
            }
            if let Some(progress) = update.progress {
                job.progress = progress.min(100);
            }
            if let Some(message) = update.message {
                job.message = message;
            }
            if let Some(serde_json::Value::Object(patch)) = update.metadata {
                if let serde_json::Value::Object(meta) = &mut job.metadata {
                    for (key, value) in patch {
                        meta.insert(key, value);
                    }
                } else {
                    job.metadata = serde_json::Value::Object(patch);
                }
            }
            Ok(())
        })
    }

    pub fn start_job(&self, id: &Uuid) -> Result<()> {
        self.mutate(id, |job| {
            if job.status != JobStatus::Pending {
                bail!("Job {} cannot start from {:?}", job.id, job.status);
            }
            job.status = JobStatus::Running;
            job.stage = "running".to_string();
            job.started_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn complete_job(&self, id: &Uuid, result: serde_json::Value) -> Result<()> {
        self.mutate(id, |job| {
            if job.status != JobStatus::Running {
                bail!("Job {} cannot complete from {:?}", job.id, job.status);
            }
            job.status = JobStatus::Completed;
            job.stage = "completed".to_string();
            job.progress = 100;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn fail_job(&self, id: &Uuid, error: &anyhow::Error) -> Result<()> {
        self.mutate(id, |job| {
            if job.status.is_terminal() {
                bail!("Job {} is already terminal", job.id);
            }
            job.status = JobStatus::Failed;
            job.stage = "failed".to_string();
            job.message = error.to_string();
            job.error = Some(JobFailure::from_error(error));
            job.failed_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn get_job(&self, id: &Uuid) -> Option<Job> {
        self.jobs.read().unwrap().get(id).cloned()
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn active_jobs(&self) -> Vec<Job> {
        self.all_jobs()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .collect()
    }

    /// Remove terminal jobs whose last update is older than `retention`.
    /// Advisory housekeeping to bound memory, not a correctness requirement.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("Swept {} expired jobs", removed);
        }
        removed
    }
}
