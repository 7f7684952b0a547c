//! Document sources: lazy, single-pass producers of raw documents.
//!
//! A [`DocumentSource`] is pull-based and consumed once; restarting a read
//! means constructing a new source. Sources absorb per-entry failures: an
//! unreadable file or corrupt archive member is logged and skipped, never
//! fatal to the whole read. Systemic failures (missing root, unopenable
//! archive) surface at construction.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::models::Document;

/// A producer of raw documents for one ingest run.
#[async_trait]
pub trait DocumentSource: Send {
    /// Pull the next document, or `None` when the source is exhausted.
    async fn next_document(&mut self) -> Result<Option<Document>>;

    /// Total documents this source will yield, when known up front.
    fn document_count(&self) -> Option<u64>;

    /// Release held resources (archive handles, ...). Idempotent; the source
    /// yields nothing further afterwards.
    fn cleanup(&mut self) -> Result<()>;
}

fn allow_list(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        builder.add(Glob::new(&format!("**/*.{ext}"))?);
    }
    Ok(builder.build()?)
}

fn default_excludes() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["**/.git/**", "**/target/**", "**/node_modules/**"] {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Directory source ============

/// Reads documents from a directory tree.
///
/// Matching paths are enumerated at construction (so the count is known and
/// ordering is deterministic); file contents are read lazily per call.
pub struct DirectorySource {
    root: PathBuf,
    pending: VecDeque<String>,
    total: u64,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Document root does not exist: {}", root.display());
        }

        let include = allow_list(extensions)?;
        let exclude = default_excludes()?;

        let mut paths: Vec<String> = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let rel_str = relative.to_string_lossy().to_string();
            if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
                continue;
            }
            paths.push(rel_str);
        }
        paths.sort();

        debug!("Directory source at {} holds {} documents", root.display(), paths.len());
        Ok(Self {
            root,
            total: paths.len() as u64,
            pending: paths.into(),
        })
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        while let Some(rel) = self.pending.pop_front() {
            let absolute = self.root.join(&rel);
            match tokio::fs::read_to_string(&absolute).await {
                Ok(content) => {
                    let size = content.len();
                    return Ok(Some(Document {
                        path: rel,
                        content,
                        source_metadata: serde_json::json!({
                            "source": "directory",
                            "bytes": size,
                        }),
                    }));
                }
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", absolute.display(), e);
                    continue;
                }
            }
        }
        Ok(None)
    }

    fn document_count(&self) -> Option<u64> {
        Some(self.total)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

// ============ Archive source ============

/// Reads documents from a ZIP archive.
///
/// The archive is opened once at construction and the handle is held until
/// [`cleanup`](DocumentSource::cleanup).
pub struct ArchiveSource {
    archive: Option<ZipArchive<File>>,
    pending: VecDeque<String>,
    total: u64,
}

impl ArchiveSource {
    pub fn new(archive_path: &Path, extensions: &[String]) -> Result<Self> {
        let file = File::open(archive_path)
            .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
        let archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive: {}", archive_path.display()))?;

        let include = allow_list(extensions)?;
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/') && include.is_match(name))
            .map(|name| name.to_string())
            .collect();
        names.sort();

        debug!(
            "Archive source at {} holds {} documents",
            archive_path.display(),
            names.len()
        );
        Ok(Self {
            archive: Some(archive),
            total: names.len() as u64,
            pending: names.into(),
        })
    }
}

#[async_trait]
impl DocumentSource for ArchiveSource {
    async fn next_document(&mut self) -> Result<Option<Document>> {
        let archive = match self.archive.as_mut() {
            Some(a) => a,
            None => return Ok(None),
        };

        while let Some(name) = self.pending.pop_front() {
            let mut entry = match archive.by_name(&name) {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable archive entry {}: {}", name, e);
                    continue;
                }
            };
            let mut content = String::new();
            if let Err(e) = entry.read_to_string(&mut content) {
                warn!("Skipping non-text archive entry {}: {}", name, e);
                continue;
            }
            let size = entry.size();
            return Ok(Some(Document {
                path: name,
                content,
                source_metadata: serde_json::json!({
                    "source": "archive",
                    "bytes": size,
                }),
            }));
        }
        Ok(None)
    }

    fn document_count(&self) -> Option<u64> {
        Some(self.total)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.pending.clear();
        self.archive = None;
        Ok(())
    }
}
