//! Core data models used throughout docsage.
//!
//! These types represent the pages, chunks, retrieval candidates, and
//! conversation turns that flow through the ingestion and query pipelines.

use serde::{Deserialize, Serialize};

/// One page of cleaned text produced by the extractor.
///
/// Page numbers are 1-based. Non-paginated formats produce a single
/// synthetic page numbered 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    pub page: u32,
}

/// Metadata stored alongside every chunk in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub filename: String,
    pub doc_id: String,
    pub page: u32,
    /// Sequential across all pages of one document; never reset per page.
    pub chunk_index: u64,
}

/// The atomic retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `{doc_id}-{chunk_index}`.
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn chunk_id(doc_id: &str, chunk_index: u64) -> String {
        format!("{}-{}", doc_id, chunk_index)
    }
}

/// An ingested document, as returned by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: String,
    pub filename: String,
    pub pages: Vec<PageText>,
    pub chunks: Vec<Chunk>,
}

/// A chunk projected for one query, with its scores.
///
/// The index similarity and the cross-encoder relevance live on different
/// scales, so they are kept in separate fields. [`score`](Self::score)
/// returns the value that currently decides the ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedCandidate {
    pub chunk_id: String,
    pub filename: String,
    pub page: u32,
    pub chunk_index: u64,
    pub excerpt: String,
    /// Cosine similarity reported by the index (higher is better).
    pub similarity: f32,
    /// Cross-encoder relevance, set only when reranking succeeded.
    pub rerank_score: Option<f32>,
}

impl RetrievedCandidate {
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.similarity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name and prompt label.
    fn names(&self) -> (&'static str, &'static str) {
        match self {
            Role::User => ("user", "User"),
            Role::Assistant => ("assistant", "Assistant"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.names().0
    }

    pub fn label(&self) -> &'static str {
        self.names().1
    }
}

/// One entry of the caller-maintained chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<crate::protocol::Citation>>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            citations: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            citations: None,
        }
    }
}

/// Returns the last `n` turns of `history`, oldest first.
pub fn recent_turns(history: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(n)..]
}
