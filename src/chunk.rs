//! Document chunking strategies.
//!
//! Three interchangeable strategies, selected by `chunking.strategy`:
//!
//! - **headers**: split on Markdown heading lines; each section becomes a
//!   candidate chunk carrying its heading, and oversized sections fall back
//!   to the size-based splitter with ` (part N)` suffixes on the heading.
//! - **size**: fixed windows of `max_chunk_size` characters advancing by
//!   `max_chunk_size - overlap`, with window ends pulled back to a sentence
//!   or line boundary when one falls past the window midpoint.
//! - **none**: the whole document is one chunk, for corpora that are already
//!   pre-segmented upstream.
//!
//! With `overlap = 0` the size-based pieces concatenate back to the exact
//! input, which the tests rely on.

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::ChunkingConfig;

/// How a document is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Headers,
    Size,
    None,
}

impl ChunkStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "headers" => Ok(Self::Headers),
            "size" => Ok(Self::Size),
            "none" => Ok(Self::None),
            other => bail!(
                "Unknown chunking strategy: '{}'. Must be headers, size, or none.",
                other
            ),
        }
    }
}

/// One piece of a split document, before ids and metadata are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Section heading (empty for size/none strategies and preamble content).
    pub heading: String,
    pub text: String,
}

/// Splits document content according to the configured strategy.
pub struct Chunker {
    strategy: ChunkStrategy,
    max_size: usize,
    overlap: usize,
    heading_re: Regex,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        if config.max_chunk_size == 0 {
            bail!("max_chunk_size must be > 0");
        }
        if config.overlap >= config.max_chunk_size {
            bail!("overlap must be smaller than max_chunk_size");
        }
        Ok(Self {
            strategy: ChunkStrategy::parse(&config.strategy)?,
            max_size: config.max_chunk_size,
            overlap: config.overlap,
            heading_re: Regex::new(r"^#{1,6}\s+\S")?,
        })
    }

    /// Split `content` into ordered pieces. Always yields at least one piece.
    pub fn chunk(&self, content: &str) -> Vec<ChunkPiece> {
        let pieces = match self.strategy {
            ChunkStrategy::Headers => self.split_by_headers(content),
            ChunkStrategy::Size => split_by_size(content, self.max_size, self.overlap)
                .into_iter()
                .map(|text| ChunkPiece {
                    heading: String::new(),
                    text,
                })
                .collect(),
            ChunkStrategy::None => vec![ChunkPiece {
                heading: String::new(),
                text: content.to_string(),
            }],
        };

        if pieces.is_empty() {
            // Guarantee at least one chunk, mirroring empty-document inserts.
            return vec![ChunkPiece {
                heading: String::new(),
                text: content.to_string(),
            }];
        }
        pieces
    }

    fn split_by_headers(&self, content: &str) -> Vec<ChunkPiece> {
        struct Section {
            heading: String,
            text: String,
        }

        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<Section> = None;

        for line in content.lines() {
            if self.heading_re.is_match(line) {
                if let Some(section) = current.take() {
                    if !section.text.trim().is_empty() {
                        sections.push(section);
                    }
                }
                current = Some(Section {
                    heading: line.trim_start_matches('#').trim().to_string(),
                    text: format!("{line}\n"),
                });
            } else {
                let section = current.get_or_insert_with(|| Section {
                    heading: String::new(),
                    text: String::new(),
                });
                section.text.push_str(line);
                section.text.push('\n');
            }
        }
        if let Some(section) = current {
            if !section.text.trim().is_empty() {
                sections.push(section);
            }
        }

        let mut pieces = Vec::new();
        for section in sections {
            if section.text.len() <= self.max_size {
                pieces.push(ChunkPiece {
                    heading: section.heading,
                    text: section.text,
                });
            } else {
                for (i, text) in split_by_size(&section.text, self.max_size, self.overlap)
                    .into_iter()
                    .enumerate()
                {
                    let heading = if section.heading.is_empty() {
                        String::new()
                    } else {
                        format!("{} (part {})", section.heading, i + 1)
                    };
                    pieces.push(ChunkPiece { heading, text });
                }
            }
        }
        pieces
    }
}

/// Largest index `<= at` that lies on a char boundary of `text`.
fn floor_char_boundary(text: &str, at: usize) -> usize {
    let mut i = at.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Fixed-size windows of `max_size` chars advancing by `max_size - overlap`.
///
/// Each window's end is pulled back to the nearest preceding `". "` or
/// newline when that boundary falls past the window's midpoint, so chunks
/// tend to end on sentence boundaries instead of mid-sentence. The trailing
/// remainder is emitted once; a remainder already contained in the previous
/// chunk's tail is suppressed.
pub fn split_by_size(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    if text.is_empty() {
        return parts;
    }

    let len = text.len();
    let mut start = 0usize;

    while start < len {
        let mut end = floor_char_boundary(text, start + max_size);

        if end < len {
            let window = &text[start..end];
            let sentence = window.rfind(". ").map(|i| i + 2);
            let newline = window.rfind('\n').map(|i| i + 1);
            let boundary = match (sentence, newline) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            if let Some(b) = boundary {
                if b > window.len() / 2 {
                    end = start + b;
                }
            }
        }

        let piece = &text[start..end];

        if end >= len {
            // Final remainder: suppress a tail the previous chunk already carries.
            let duplicate = parts
                .last()
                .map(|prev| prev.ends_with(piece))
                .unwrap_or(false);
            if !duplicate {
                parts.push(piece.to_string());
            }
            break;
        }

        parts.push(piece.to_string());

        let next = floor_char_boundary(text, end.saturating_sub(overlap));
        start = if next > start { next } else { end };
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(strategy: &str, max_size: usize, overlap: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            strategy: strategy.to_string(),
            max_chunk_size: max_size,
            overlap,
            include_root_segment: false,
        })
        .unwrap()
    }

    #[test]
    fn none_strategy_single_chunk() {
        let pieces = chunker("none", 100, 0).chunk("short document body");
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "short document body");
        assert!(pieces[0].heading.is_empty());
    }

    #[test]
    fn empty_document_still_yields_one_chunk() {
        let pieces = chunker("size", 100, 0).chunk("");
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].text, "");
    }

    #[test]
    fn size_zero_overlap_reconstructs_input() {
        let text: String = (0..40)
            .map(|i| format!("Sentence number {i} sits right here. "))
            .collect();
        let parts = split_by_size(&text, 120, 0);
        assert!(parts.len() > 1);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn size_windows_respect_max_and_overlap() {
        // 3,000 chars, chunkSize=1000, overlap=200: at least 3 chunks, each
        // <= 1000, consecutive chunks overlapping by up to 200 chars.
        let sentence = "The quick brown fox jumps over the lazy dog again. ";
        let text: String = sentence.repeat(59); // 3,008 chars
        let parts = split_by_size(&text, 1000, 200);

        assert!(parts.len() >= 3, "expected >= 3 parts, got {}", parts.len());
        for part in &parts {
            assert!(part.len() <= 1000, "part too long: {}", part.len());
        }
        for pair in parts.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let max_probe = a.len().min(b.len()).min(200);
            let overlap = (1..=max_probe)
                .rev()
                .find(|&n| b.starts_with(&a[a.len() - n..]))
                .unwrap_or(0);
            assert!(overlap <= 200, "overlap {} exceeds configured 200", overlap);
            assert!(overlap > 0, "consecutive parts should share a tail");
        }
    }

    #[test]
    fn size_pulls_back_to_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(80), "b".repeat(100));
        let parts = split_by_size(&text, 100, 0);
        // The boundary after "aaa... . " sits past the midpoint of the first
        // window, so the first part ends right after the period-space.
        assert!(parts[0].ends_with(". "));
        assert_eq!(parts[0].len(), 82);
    }

    #[test]
    fn size_suppresses_duplicate_tail() {
        // With a large overlap the final remainder can be fully contained in
        // the previous chunk; it must not be emitted again as a short tail.
        let text = "x".repeat(130);
        let parts = split_by_size(&text, 100, 80);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 100));
    }

    #[test]
    fn size_never_splits_multibyte_chars() {
        let text = "héllo wörld → ünïcode test. ".repeat(30);
        let parts = split_by_size(&text, 50, 10);
        for part in &parts {
            assert!(!part.is_empty());
            // Constructing the &str above would already have panicked on a
            // bad boundary; this asserts the pieces stay valid text.
            assert!(part.chars().count() > 0);
        }
    }

    #[test]
    fn headers_split_into_sections() {
        let doc = "# Title\nIntro paragraph.\n\n## Usage\nHow to use it.\n\n## API\nReference.\n";
        let pieces = chunker("headers", 500, 0).chunk(doc);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].heading, "Title");
        assert_eq!(pieces[1].heading, "Usage");
        assert_eq!(pieces[2].heading, "API");
        assert!(pieces[1].text.starts_with("## Usage"));
    }

    #[test]
    fn headers_preamble_has_empty_heading() {
        let doc = "Leading text before any heading.\n\n# First\nBody.\n";
        let pieces = chunker("headers", 500, 0).chunk(doc);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].heading.is_empty());
        assert_eq!(pieces[1].heading, "First");
    }

    #[test]
    fn headers_oversized_section_gets_part_suffixes() {
        let doc = format!("# Long\n{}", "Sentence goes here. ".repeat(30));
        let pieces = chunker("headers", 200, 20).chunk(&doc);
        assert!(pieces.len() > 1);
        assert_eq!(pieces[0].heading, "Long (part 1)");
        assert_eq!(pieces[1].heading, "Long (part 2)");
    }

    #[test]
    fn headers_ignores_hashes_inside_code_text() {
        let doc = "# Real\nbody with #not-a-heading inline\n";
        let pieces = chunker("headers", 500, 0).chunk(doc);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].heading, "Real");
    }
}
