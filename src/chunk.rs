//! Sliding-window text chunker.
//!
//! Splits one page of text into windows of `chunk_size` characters, each
//! starting `chunk_size - overlap` characters after the previous one. The
//! last window is clipped to the end of the text and may be shorter.
//!
//! Every character is covered by at least one chunk, and by at most
//! `ceil(chunk_size / (chunk_size - overlap))` chunks.
//!
//! Sizes are counted in characters, not bytes, so windows never split a
//! UTF-8 sequence.

use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata};

/// Validated window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(IngestError::InvalidChunkParams {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Where a page's chunks belong.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSource<'a> {
    pub doc_id: &'a str,
    pub filename: &'a str,
    pub page: u32,
}

/// Character ranges `[start, end)` of each window over a text of `len` chars.
pub fn window_ranges(len: usize, params: ChunkParams) -> Vec<(usize, usize)> {
    if len <= params.chunk_size {
        return vec![(0, len)];
    }
    (0..len)
        .step_by(params.stride())
        .map(|start| (start, (start + params.chunk_size).min(len)))
        .collect()
}

/// Chunk one page. Indices start at `start_index` and increase by one per
/// chunk; callers chunking several pages of a document pass the running
/// count forward so ids stay unique across pages.
pub fn chunk_text(
    source: ChunkSource<'_>,
    text: &str,
    params: ChunkParams,
    start_index: u64,
) -> Vec<Chunk> {
    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    window_ranges(char_len, params)
        .into_iter()
        .enumerate()
        .map(|(offset, (start, end))| {
            let chunk_index = start_index + offset as u64;
            Chunk {
                id: Chunk::chunk_id(source.doc_id, chunk_index),
                text: text[boundaries[start]..boundaries[end]].to_string(),
                metadata: ChunkMetadata {
                    filename: source.filename.to_string(),
                    doc_id: source.doc_id.to_string(),
                    page: source.page,
                    chunk_index,
                },
            }
        })
        .collect()
}
