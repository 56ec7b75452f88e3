//! Candidate retrieval.
//!
//! Embeds the standalone query and asks the index for
//! `OVERFETCH_FACTOR * target_k` nearest chunks, giving the reranker a
//! pool larger than what will finally be cited.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::QueryError;
use crate::index::{IndexHit, VectorIndex};
use crate::models::RetrievedCandidate;

pub const OVERFETCH_FACTOR: usize = 3;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Up to `3 * target_k` candidates, best first by index similarity.
    pub async fn retrieve(
        &self,
        query: &str,
        target_k: usize,
    ) -> Result<Vec<RetrievedCandidate>, QueryError> {
        let initial_k = target_k.saturating_mul(OVERFETCH_FACTOR);
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let hits = self.index.query(&vector, initial_k).await?;
        debug!(requested = initial_k, returned = hits.len(), "retrieved candidates");
        Ok(hits.into_iter().map(candidate_from_hit).collect())
    }
}

fn candidate_from_hit(hit: IndexHit) -> RetrievedCandidate {
    let IndexHit { chunk, similarity } = hit;
    RetrievedCandidate {
        chunk_id: chunk.id,
        filename: chunk.metadata.filename,
        page: chunk.metadata.page,
        chunk_index: chunk.metadata.chunk_index,
        excerpt: chunk.text,
        similarity,
        rerank_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::error::EmbeddingError;
    use crate::index::InMemoryIndex;
    use crate::models::{Chunk, ChunkMetadata};
    use async_trait::async_trait;

    /// Maps every text to the same fixed vector.
    struct Fixed(Vec<f32>);

    #[async_trait]
    impl Embedder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    async fn seeded(n: usize) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        let chunks: Vec<Chunk> = (0..n as u64)
            .map(|i| Chunk {
                id: Chunk::chunk_id("d", i),
                text: format!("chunk {}", i),
                metadata: ChunkMetadata {
                    filename: "d.txt".into(),
                    doc_id: "d".into(),
                    page: 1,
                    chunk_index: i,
                },
            })
            .collect();
        // Later chunks point further away from [1, 0].
        let vectors: Vec<Vec<f32>> = (0..n).map(|i| vec![1.0, i as f32 * 0.1]).collect();
        index.upsert(&chunks, &vectors).await.unwrap();
        index
    }

    #[tokio::test]
    async fn overfetches_three_times_target() {
        let retriever = Retriever::new(Arc::new(Fixed(vec![1.0, 0.0])), seeded(20).await);
        let candidates = retriever.retrieve("q", 4).await.unwrap();
        assert_eq!(candidates.len(), 12);
        assert_eq!(candidates[0].chunk_id, "d-0");
        assert!(candidates
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
        assert!(candidates.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn small_index_returns_what_it_has() {
        let retriever = Retriever::new(Arc::new(Fixed(vec![1.0, 0.0])), seeded(2).await);
        assert_eq!(retriever.retrieve("q", 15).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changed_embedding_model_is_an_index_failure() {
        let retriever = Retriever::new(Arc::new(Fixed(vec![1.0, 0.0, 0.0])), seeded(3).await);
        let err = retriever.retrieve("q", 2).await.unwrap_err();
        assert!(matches!(err, QueryError::IndexQueryFailure(_)));
    }

    #[tokio::test]
    async fn embedding_failure_is_fatal() {
        let retriever = Retriever::new(Arc::new(DisabledEmbedder), seeded(2).await);
        let err = retriever.retrieve("q", 5).await.unwrap_err();
        assert!(matches!(err, QueryError::EmbeddingFailure(_)));
    }
}
