//! Storage abstraction for docdex.
//!
//! The [`VectorStore`] trait defines all storage operations needed by the
//! indexing and retrieval pipeline, enabling pluggable backends (SQLite,
//! in-memory). Implementations must be `Send + Sync` to work with async
//! runtimes.
//!
//! # Filters
//!
//! A [`Filter`] is a flat field → value map. A scalar value is an equality
//! predicate; a list is an OR of equalities on that field; multiple fields
//! AND-combine. For the `tags` field, equality means list containment. This
//! AND-of-ORs shape is the full expressiveness the query layer needs; it is
//! deliberately not a nested boolean tree.
//!
//! # Scores
//!
//! Search scores are hybrid: keyword and vector candidate channels are
//! min-max normalized independently, then blended as
//! `(1 - alpha) * keyword + alpha * vector`. Results are in `[0, 1]` with 1
//! best; callers never rescale them.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Chunk, ChunkMetadata, EmbeddedChunk, SearchResult};

/// Predicate on one metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// Field equals the value (for `tags`: the list contains it).
    Equals(String),
    /// Field equals any of the values (OR within the field).
    AnyOf(Vec<String>),
}

/// Flat AND-of-ORs metadata filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    fields: BTreeMap<String, FilterValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(field.into(), FilterValue::Equals(value.into()));
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.fields.insert(field.into(), FilterValue::AnyOf(values));
        self
    }

    /// Set a field predicate in place (used when merging the resolved
    /// version into a caller-supplied filter).
    pub fn set(&mut self, field: impl Into<String>, value: FilterValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.fields.iter()
    }

    /// Evaluate this filter against one chunk's metadata.
    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        self.fields.iter().all(|(field, predicate)| {
            if field == "tags" {
                return match predicate {
                    FilterValue::Equals(v) => meta.tags.iter().any(|t| t == v),
                    FilterValue::AnyOf(vs) => meta.tags.iter().any(|t| vs.contains(t)),
                };
            }
            let actual = match field.as_str() {
                "version" => Some(meta.version.as_str()),
                "path" => Some(meta.document_path.as_str()),
                "product" => Some(meta.product.as_str()),
                "framework" => Some(meta.framework.as_str()),
                "type" => Some(meta.doc_type.as_str()),
                "heading" => Some(meta.heading.as_str()),
                _ => None,
            };
            match (actual, predicate) {
                (Some(actual), FilterValue::Equals(v)) => actual == v,
                (Some(actual), FilterValue::AnyOf(vs)) => vs.iter().any(|v| v == actual),
                // Unknown fields never match anything.
                (None, _) => false,
            }
        })
    }
}

/// One hybrid search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query text for the keyword channel.
    pub query: String,
    /// Query embedding for the vector channel; `None` runs keyword-only.
    pub vector: Option<Vec<f32>>,
    /// Maximum results to return.
    pub limit: usize,
    /// Metadata filter applied to both channels.
    pub filter: Filter,
}

/// Durable, queryable storage of chunks, vectors, and metadata.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure the schema exists. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Upsert chunks by their caller-supplied ids, in internal sub-batches.
    async fn add_documents(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Hybrid similarity search, ranked best-first.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>>;

    /// Fetch a single chunk by id.
    async fn get_document(&self, id: &Uuid) -> Result<Option<Chunk>>;

    /// All chunks of one document in one version, ordered by `chunk_index`.
    async fn get_document_chunks(&self, path: &str, version: &str) -> Result<Vec<Chunk>>;

    /// Delete chunks matching the filter; returns the number removed.
    async fn delete_documents(&self, filter: &Filter) -> Result<u64>;

    /// Delete every chunk of one version; returns the number removed.
    async fn delete_by_version(&self, version: &str) -> Result<u64> {
        self.delete_documents(&Filter::new().equals("version", version))
            .await
    }

    /// Distinct versions, ascending string order. Cached (TTL ~60s),
    /// invalidated by writes and deletes.
    async fn all_versions(&self) -> Result<Vec<String>>;

    /// The maximum of [`all_versions`](Self::all_versions), or `None` when
    /// nothing is indexed.
    ///
    /// Plain string ordering: "10.0.0" sorts below "9.0.0". Consumers may
    /// already depend on this ordering.
    // TODO: semver-aware comparison, coordinated with existing consumers.
    async fn latest_version(&self) -> Result<Option<String>> {
        Ok(self.all_versions().await?.into_iter().next_back())
    }

    /// Distinct tags, ascending. Cached alongside versions.
    async fn all_tags(&self) -> Result<Vec<String>>;

    /// Drop and recreate the schema, removing all data.
    async fn clear_all(&self) -> Result<()>;
}

// ============ Score blending ============

/// Min-max normalize raw channel scores to `[0, 1]` (all-equal → all 1.0).
pub(crate) fn normalize_scores(candidates: &[(Uuid, f64)]) -> Vec<(Uuid, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(id, s)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            };
            (*id, norm)
        })
        .collect()
}

/// Blend normalized keyword and vector channels into a ranked id list.
///
/// When one channel produced no candidates the other is used alone, so
/// keyword-only operation still tops out at 1.0.
pub(crate) fn hybrid_blend(
    keyword: &[(Uuid, f64)],
    vector: &[(Uuid, f64)],
    alpha: f64,
) -> Vec<(Uuid, f64)> {
    let effective_alpha = if vector.is_empty() {
        0.0
    } else if keyword.is_empty() {
        1.0
    } else {
        alpha
    };

    let norm_keyword = normalize_scores(keyword);
    let norm_vector = normalize_scores(vector);

    let kw_map: BTreeMap<Uuid, f64> = norm_keyword.into_iter().collect();
    let vec_map: BTreeMap<Uuid, f64> = norm_vector.into_iter().collect();

    let mut scored: Vec<(Uuid, f64)> = kw_map
        .keys()
        .chain(vec_map.keys())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .map(|id| {
            let k = kw_map.get(id).copied().unwrap_or(0.0);
            let v = vec_map.get(id).copied().unwrap_or(0.0);
            let score = ((1.0 - effective_alpha) * k + effective_alpha * v).clamp(0.0, 1.0);
            (*id, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored
}

// ============ Aggregate cache ============

/// TTL cache for the version and tag aggregations, shared by both backends.
///
/// Writes and deletes call [`invalidate`](AggregateCache::invalidate); reads
/// within the TTL are served without touching storage.
pub(crate) struct AggregateCache {
    ttl: Duration,
    versions: RwLock<Option<(Instant, Vec<String>)>>,
    tags: RwLock<Option<(Instant, Vec<String>)>>,
}

impl AggregateCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            versions: RwLock::new(None),
            tags: RwLock::new(None),
        }
    }

    pub(crate) fn cached_versions(&self) -> Option<Vec<String>> {
        let guard = self.versions.read().unwrap();
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub(crate) fn store_versions(&self, versions: Vec<String>) {
        *self.versions.write().unwrap() = Some((Instant::now(), versions));
    }

    pub(crate) fn cached_tags(&self) -> Option<Vec<String>> {
        let guard = self.tags.read().unwrap();
        guard
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub(crate) fn store_tags(&self, tags: Vec<String>) {
        *self.tags.write().unwrap() = Some((Instant::now(), tags));
    }

    pub(crate) fn invalidate(&self) {
        *self.versions.write().unwrap() = None;
        *self.tags.write().unwrap() = None;
    }
}

/// Default aggregate-cache TTL.
pub(crate) const AGGREGATE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Internal upsert sub-batch size: chunks written per store round-trip.
pub(crate) const UPSERT_BATCH: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(version: &str, product: &str, tags: &[&str]) -> ChunkMetadata {
        ChunkMetadata {
            document_path: "grid/guides/x.md".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            product: product.to_string(),
            framework: "vanilla".to_string(),
            doc_type: "guide".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            heading: String::new(),
            version: version.to_string(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&meta("1.0", "grid", &[])));
    }

    #[test]
    fn scalar_fields_and_combine() {
        let filter = Filter::new()
            .equals("version", "1.0")
            .equals("product", "grid");
        assert!(filter.matches(&meta("1.0", "grid", &[])));
        assert!(!filter.matches(&meta("1.0", "core", &[])));
        assert!(!filter.matches(&meta("2.0", "grid", &[])));
    }

    #[test]
    fn any_of_is_or_within_a_field() {
        let filter = Filter::new().any_of(
            "product",
            vec!["grid".to_string(), "scheduler".to_string()],
        );
        assert!(filter.matches(&meta("1.0", "grid", &[])));
        assert!(filter.matches(&meta("1.0", "scheduler", &[])));
        assert!(!filter.matches(&meta("1.0", "core", &[])));
    }

    #[test]
    fn tags_filter_means_containment() {
        let filter = Filter::new().equals("tags", "react");
        assert!(filter.matches(&meta("1.0", "grid", &["guides", "react"])));
        assert!(!filter.matches(&meta("1.0", "grid", &["guides"])));

        let any = Filter::new().any_of("tags", vec!["vue".to_string(), "react".to_string()]);
        assert!(any.matches(&meta("1.0", "grid", &["react"])));
        assert!(!any.matches(&meta("1.0", "grid", &["svelte"])));
    }

    #[test]
    fn unknown_fields_never_match() {
        let filter = Filter::new().equals("nonsense", "x");
        assert!(!filter.matches(&meta("1.0", "grid", &[])));
    }

    #[test]
    fn normalize_maps_to_unit_interval() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let normalized = normalize_scores(&[(a, 10.0), (b, 5.0), (c, 0.0)]);
        let by_id: BTreeMap<Uuid, f64> = normalized.into_iter().collect();
        assert!((by_id[&a] - 1.0).abs() < 1e-9);
        assert!((by_id[&b] - 0.5).abs() < 1e-9);
        assert!(by_id[&c].abs() < 1e-9);
    }

    #[test]
    fn normalize_all_equal_gives_ones() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for (_, score) in normalize_scores(&[(a, 3.0), (b, 3.0)]) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn blend_falls_back_to_the_populated_channel() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // Keyword-only: alpha is ignored, best keyword hit scores 1.0.
        let ranked = hybrid_blend(&[(a, 4.0), (b, 1.0)], &[], 0.6);
        assert_eq!(ranked[0].0, a);
        assert!((ranked[0].1 - 1.0).abs() < 1e-9);

        // Vector-only mirrors it.
        let ranked = hybrid_blend(&[], &[(b, 0.9), (a, 0.2)], 0.6);
        assert_eq!(ranked[0].0, b);
        assert!((ranked[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blend_weights_both_channels() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let keyword = vec![(a, 1.0), (b, 0.0)];
        let vector = vec![(a, 0.0), (b, 1.0)];

        let ranked = hybrid_blend(&keyword, &vector, 0.6);
        let by_id: BTreeMap<Uuid, f64> = ranked.into_iter().collect();
        // a: 0.4 * 1 + 0.6 * 0 = 0.4; b: 0.6.
        assert!((by_id[&a] - 0.4).abs() < 1e-9);
        assert!((by_id[&b] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn aggregate_cache_expires_and_invalidates() {
        let cache = AggregateCache::new(Duration::from_millis(20));
        assert!(cache.cached_versions().is_none());

        cache.store_versions(vec!["1.0".to_string()]);
        assert_eq!(cache.cached_versions().unwrap(), vec!["1.0".to_string()]);

        cache.invalidate();
        assert!(cache.cached_versions().is_none());

        cache.store_versions(vec!["2.0".to_string()]);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.cached_versions().is_none());
    }
}
