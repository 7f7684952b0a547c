//! Query service: hybrid search over one version of the corpus.
//!
//! Resolves an unspecified version to the latest indexed one, merges it into
//! the store filter, and compensates for the store's filter language with a
//! tag over-fetch: the store cannot combine "any tag in this set" with a
//! hybrid query in one call, so we fetch `limit × overfetch_factor`
//! candidates and intersect tag sets client-side before truncating.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingService;
use crate::models::SearchResult;
use crate::store::{Filter, FilterValue, SearchRequest, VectorStore};

/// Options for one search call.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Maximum results; falls back to `retrieval.default_limit`.
    pub limit: Option<usize>,
    /// Caller-supplied metadata filter; the resolved version is merged in.
    pub filter: Filter,
    /// Version to search; `None` resolves to the latest indexed version.
    pub version: Option<String>,
    /// Results must share at least one of these tags (post-filtered).
    pub tags: Vec<String>,
}

pub struct QueryService {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<EmbeddingService>>,
    config: RetrievalConfig,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Option<Arc<EmbeddingService>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let limit = options.limit.unwrap_or(self.config.default_limit).max(1);

        let version = match &options.version {
            Some(version) => version.clone(),
            None => match self.store.latest_version().await? {
                Some(version) => version,
                // Nothing indexed yet is an empty result, not an error.
                None => return Ok(Vec::new()),
            },
        };

        let mut filter = options.filter.clone();
        filter.set("version", FilterValue::Equals(version.clone()));

        let vector = match &self.embedder {
            Some(embedder) => Some(embedder.embed(query).await?),
            None => None,
        };

        let fetch_limit = if options.tags.is_empty() {
            limit
        } else {
            limit * self.config.overfetch_factor
        };

        debug!(
            "Searching version {} (limit {}, fetch {})",
            version, limit, fetch_limit
        );

        let mut results = self
            .store
            .search(&SearchRequest {
                query: query.to_string(),
                vector,
                limit: fetch_limit,
                filter,
            })
            .await?;

        if !options.tags.is_empty() {
            results.retain(|result| {
                result
                    .metadata
                    .tags
                    .iter()
                    .any(|tag| options.tags.contains(tag))
            });
            results.truncate(limit);
        }

        Ok(results)
    }
}

/// Render results as a deterministic context block for prompt assembly.
///
/// Purely a formatting utility: one section per result with its heading,
/// source path, a `1 - score` distance display, and the full chunk text.
pub fn format_context(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for result in results {
        let heading = if result.metadata.heading.is_empty() {
            result.metadata.document_path.as_str()
        } else {
            result.metadata.heading.as_str()
        };
        out.push_str(&format!("## {heading}\n\n"));
        out.push_str(&format!(
            "Source: {} (version {}, distance {:.4})\n\n",
            result.metadata.document_path,
            result.metadata.version,
            1.0 - result.score
        ));
        out.push_str(&result.text);
        if !result.text.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
