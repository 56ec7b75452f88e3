//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the narrow contract the pipelines use to
//! store chunk embeddings and run nearest-neighbour queries. Two backends
//! ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteIndex`] | persistent index, brute-force cosine over stored vectors |
//! | [`InMemoryIndex`] | tests and throwaway sessions |
//!
//! Implementations must allow concurrent queries. Mutations (`upsert`,
//! `reset`) are serialized with respect to each other, and `reset` is
//! all-or-nothing: readers observe either the old contents or an empty
//! index, never a partial state.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::Chunk;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector (higher is better).
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks keyed by chunk id. `vectors` is aligned
    /// with `chunks`.
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Up to `top_k` hits, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError>;

    /// Remove every chunk and document. Idempotent.
    async fn reset(&self) -> Result<(), IndexError>;

    async fn stats(&self) -> Result<IndexStats, IndexError>;
}

pub(crate) fn check_aligned(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    if chunks.len() != vectors.len() {
        return Err(IndexError::Mismatch(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    Ok(())
}

/// Every vector in one index has the same length. A query or upsert with a
/// different length means the embedding model changed since ingest.
pub(crate) fn check_dims(stored: usize, given: usize) -> Result<(), IndexError> {
    if stored != given {
        return Err(IndexError::Mismatch(format!(
            "vector has {} dimensions but the index holds {}-dimensional vectors; \
             reset and re-ingest after changing the embedding model",
            given, stored
        )));
    }
    Ok(())
}

/// The one length shared by `vectors`, or `None` for an empty batch.
pub(crate) fn batch_dims(vectors: &[Vec<f32>]) -> Result<Option<usize>, IndexError> {
    let Some(first) = vectors.first() else {
        return Ok(None);
    };
    for v in vectors {
        check_dims(first.len(), v.len())?;
    }
    Ok(Some(first.len()))
}

/// Sort best-first and keep `top_k`. Ties keep their input order.
pub(crate) fn rank_hits(mut hits: Vec<IndexHit>, top_k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}
