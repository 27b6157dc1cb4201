//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`] - splits by character count with configurable overlap
//! - [`RecursiveChunker`] - ends each passage at the strongest separator
//!   (paragraph, line, sentence, word) inside the window
//!
//! Sizes are measured in characters (Unicode scalar values), never bytes.
//! Both chunkers share exactly `overlap` characters between consecutive
//! passages, so the text is recovered by taking the first passage whole and
//! every later passage minus its first `overlap` characters.

use crate::document::{Chunk, Document, FILENAME_KEY};
use crate::error::{RagError, Result};

/// Separators tried by [`RecursiveChunker`], strongest first.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting documents into chunks.
///
/// Implementations only decide passage boundaries; [`chunk`](Chunker::chunk)
/// turns passages into [`Chunk`]s. The registry embeds them afterwards and
/// keeps the vectors in the session index.
pub trait Chunker: Send + Sync {
    /// Split text into ordered passages. Empty text yields no passages.
    fn split(&self, text: &str) -> Vec<String>;

    /// Characters shared between consecutive passages.
    fn overlap(&self) -> usize;

    /// Split a document into chunks.
    ///
    /// Chunk IDs are `{document_id}_{index}`. Each chunk inherits the
    /// document's metadata plus a `filename` entry.
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.split(&document.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let mut metadata = document.metadata.clone();
                metadata.insert(FILENAME_KEY.to_string(), document.filename.clone());
                Chunk {
                    id: format!("{}_{index}", document.id),
                    document_id: document.id.clone(),
                    index,
                    text,
                    metadata,
                }
            })
            .collect()
    }
}

/// Check that `0 <= overlap < chunk_size`.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<()> {
    if overlap >= chunk_size {
        return Err(RagError::InvalidConfiguration(format!(
            "chunk_overlap ({overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Split `text` into fixed-size passages.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfiguration`] unless `overlap < chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(FixedSizeChunker::new(chunk_size, overlap)?.split(text))
}

/// Byte offset of every char start, plus `text.len()` as a terminator.
fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect()
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn split(&self, text: &str) -> Vec<String> {
        let offsets = char_offsets(text);
        let len = offsets.len() - 1;
        let step = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + self.chunk_size).min(len);
            chunks.push(text[offsets[start]..offsets[end]].to_string());
            if end == len {
                break;
            }
            start += step;
        }
        chunks
    }

    fn overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Splits text at natural boundaries: paragraphs, then lines, sentences, words.
///
/// Each window of `chunk_size` characters is cut after the last occurrence of
/// the strongest separator found in its back half. If no separator qualifies
/// the window is cut at `chunk_size`. The next window starts `chunk_overlap`
/// characters before the cut.
///
/// # Example
///
/// ```rust,ignore
/// use docchat_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] unless `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Pick the cut position (in chars) for the window `[start, hard_end)`.
    fn cut_point(&self, text: &str, offsets: &[usize], start: usize, hard_end: usize) -> usize {
        // Cuts must land past the overlap so the next window advances, and
        // in the back half so passages stay close to chunk_size.
        let min_end = (start + self.chunk_overlap + 1).max(start + self.chunk_size / 2);
        let window = &text[offsets[start]..offsets[hard_end]];

        for separator in SEPARATORS {
            if let Some(pos) = window.rfind(separator) {
                let cut_byte = offsets[start] + pos + separator.len();
                if let Ok(cut) = offsets.binary_search(&cut_byte) {
                    if cut >= min_end {
                        return cut;
                    }
                }
            }
        }
        hard_end
    }
}

impl Chunker for RecursiveChunker {
    fn split(&self, text: &str) -> Vec<String> {
        let offsets = char_offsets(text);
        let len = offsets.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let hard_end = (start + self.chunk_size).min(len);
            if hard_end == len {
                chunks.push(text[offsets[start]..].to_string());
                break;
            }
            let end = self.cut_point(text, &offsets, start, hard_end);
            chunks.push(text[offsets[start]..offsets[end]].to_string());
            start = end - self.chunk_overlap;
        }
        chunks
    }

    fn overlap(&self) -> usize {
        self.chunk_overlap
    }
}
