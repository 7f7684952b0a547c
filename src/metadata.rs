//! Path-derived structural metadata.
//!
//! Every function here is total: given any path it returns a value, never an
//! error. Derivation looks only at `/`-separated path segments, so the same
//! document yields the same metadata no matter which source produced it.

/// Products recognized as path segments. Anything else maps to `"core"`.
const KNOWN_PRODUCTS: &[&str] = &["grid", "scheduler", "gantt", "calendar", "kanban", "charts"];

/// Frameworks recognized as path segments. Anything else maps to `"vanilla"`.
const KNOWN_FRAMEWORKS: &[&str] = &["react", "angular", "vue", "svelte"];

/// Path-segment keywords mapped to document types.
const TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("guides", "guide"),
    ("api", "api"),
    ("examples", "example"),
    ("concepts", "concept"),
];

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Directory segments of `path` (filename excluded), de-duplicated while
/// preserving first-seen order.
///
/// `include_root` selects between the two historical tag rules: whether the
/// first segment (the docs-tree root) is itself a tag.
pub fn extract_tags(path: &str, include_root: bool) -> Vec<String> {
    let segs = segments(path);
    if segs.len() < 2 {
        return Vec::new();
    }
    let dirs = &segs[..segs.len() - 1];
    let skip = if include_root { 0 } else { 1 };

    let mut tags: Vec<String> = Vec::new();
    for seg in dirs.iter().skip(skip) {
        if !tags.iter().any(|t| t == seg) {
            tags.push((*seg).to_string());
        }
    }
    // Root-only paths still get their one directory as a tag.
    if tags.is_empty() && !include_root && !dirs.is_empty() {
        tags.push(dirs[0].to_string());
    }
    tags
}

/// First known product appearing as a path segment, `"core"` otherwise.
pub fn extract_product(path: &str) -> String {
    segments(path)
        .iter()
        .find(|seg| KNOWN_PRODUCTS.contains(&seg.to_lowercase().as_str()))
        .map(|seg| seg.to_lowercase())
        .unwrap_or_else(|| "core".to_string())
}

/// First known framework appearing as a path segment, `"vanilla"` otherwise.
pub fn extract_framework(path: &str) -> String {
    segments(path)
        .iter()
        .find(|seg| KNOWN_FRAMEWORKS.contains(&seg.to_lowercase().as_str()))
        .map(|seg| seg.to_lowercase())
        .unwrap_or_else(|| "vanilla".to_string())
}

/// Document type from the first path segment matching a type keyword,
/// `"guide"` otherwise.
pub fn extract_doc_type(path: &str) -> String {
    for seg in segments(path) {
        let lower = seg.to_lowercase();
        for (keyword, doc_type) in TYPE_KEYWORDS {
            if lower == *keyword {
                return (*doc_type).to_string();
            }
        }
    }
    "guide".to_string()
}
