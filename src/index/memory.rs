//! In-memory [`VectorIndex`] for tests and throwaway sessions.
//!
//! Chunks live in a `HashMap` behind a `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector. Because every
//! mutation takes the write lock, `reset` is trivially atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::Chunk;

use super::{batch_dims, check_aligned, check_dims, rank_hits, IndexHit, IndexStats, VectorIndex};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    /// Insertion order, used to keep tie-breaking stable.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    chunks: HashMap<String, StoredChunk>,
    next_seq: u64,
    /// Vector length of the stored chunks; `None` while empty.
    dims: Option<usize>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    inner: RwLock<Inner>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave `Inner` half-updated, so a poisoned
    // lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        check_aligned(chunks, vectors)?;
        let Some(dims) = batch_dims(vectors)? else {
            return Ok(());
        };
        let mut inner = self.write();
        if let Some(stored) = inner.dims {
            check_dims(stored, dims)?;
        }
        inner.dims = Some(dims);
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let existing = inner.chunks.get(&chunk.id).map(|s| s.seq);
            let seq = match existing {
                Some(seq) => seq,
                None => {
                    inner.next_seq += 1;
                    inner.next_seq
                }
            };
            inner.chunks.insert(
                chunk.id.clone(),
                StoredChunk {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                    seq,
                },
            );
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let inner = self.read();
        if let Some(stored) = inner.dims {
            check_dims(stored, vector.len())?;
        }
        let mut stored: Vec<&StoredChunk> = inner.chunks.values().collect();
        stored.sort_by_key(|s| s.seq);
        let hits = stored
            .into_iter()
            .map(|s| IndexHit {
                chunk: s.chunk.clone(),
                similarity: cosine_similarity(vector, &s.vector),
            })
            .collect();
        Ok(rank_hits(hits, top_k))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let mut inner = self.write();
        inner.chunks.clear();
        inner.dims = None;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let inner = self.read();
        let mut docs: Vec<&str> = inner
            .chunks
            .values()
            .map(|s| s.chunk.metadata.doc_id.as_str())
            .collect();
        docs.sort_unstable();
        docs.dedup();
        Ok(IndexStats {
            documents: docs.len(),
            chunks: inner.chunks.len(),
        })
    }
}
