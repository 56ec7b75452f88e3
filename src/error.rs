//! Error taxonomy for the ingestion and query pipelines.
//!
//! Ingestion errors are fatal to one ingestion call. Query errors are fatal
//! to one query and surface as the terminal error marker of the event
//! stream. [`RerankFailure`] is recovered where it occurs and never reaches
//! the caller.

use thiserror::Error;

/// Failure of the embedding collaborator.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("local embedding model failed: {0}")]
    Model(String),
}

/// Failure of the vector index collaborator.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("index input mismatch: {0}")]
    Mismatch(String),
}

/// Failure of the text-generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation provider is disabled")]
    Disabled,
    #[error("generation service unreachable: {0}")]
    Unreachable(String),
    #[error("generation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation stream broke: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("failed to extract text from {filename}: {reason}")]
    ExtractionFailure { filename: String, reason: String },
    #[error("no text could be extracted from {0}; is it a scanned image?")]
    NoExtractableText(String),
    #[error("invalid chunk parameters: overlap {overlap} must be smaller than chunk_size {chunk_size}")]
    InvalidChunkParams { chunk_size: usize, overlap: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to embed query: {0}")]
    EmbeddingFailure(#[from] EmbeddingError),
    #[error("failed to query index: {0}")]
    IndexQueryFailure(#[from] IndexError),
    #[error("answer generation failed: {0}")]
    GenerationFailure(#[from] GenerationError),
}

/// Reranking could not be applied; the caller falls back to index order.
#[derive(Debug, Error)]
#[error("rerank failed: {reason}")]
pub struct RerankFailure {
    pub reason: String,
}

impl RerankFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
