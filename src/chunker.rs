//! Chunker (spec §4.2): splits per-page text into overlapping windows.
//!
//! Delegates the recursive "paragraphs, then lines, then words, then
//! characters" splitting cascade to `text-splitter`, the crate the wider
//! retrieved pack reaches for when it needs the exact same shape of work
//! (see `perstarkse-minne/ingestion-pipeline/src/pipeline/services.rs`).
//! `text-splitter`'s default character sizer matches spec §4.2's
//! character-count target directly, so no tokenizer feature is needed here.

use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

const TARGET_CHARS: usize = 1000;
const OVERLAP_CHARS: usize = 100;

/// A single window of page text with positional metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    pub content: String,
    pub source_file: String,
    pub page: i64,
    pub offset: i64,
}

/// Splits the text of a single page into overlapping windows, preserving
/// document order and byte offsets within the page.
pub fn chunk_page(text: &str, source_file: &str, page: i64) -> Vec<ChunkWindow> {
    if text.is_empty() {
        return Vec::new();
    }

    let capacity = ChunkCapacity::new(TARGET_CHARS);
    let config = ChunkConfig::new(capacity)
        .with_overlap(OVERLAP_CHARS)
        .expect("overlap is smaller than target window size");
    let splitter = TextSplitter::new(config);

    splitter
        .chunk_indices(text)
        .filter(|(_, content)| !content.trim().is_empty())
        .map(|(offset, content)| ChunkWindow {
            content: content.to_string(),
            source_file: source_file.to_string(),
            page,
            offset: offset as i64,
        })
        .collect()
}
