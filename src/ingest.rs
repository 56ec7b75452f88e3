//! Ingestion pipeline orchestration.
//!
//! Coordinates the upload flow: extraction → chunking → embedding →
//! index upsert. Every call mints a fresh `doc_id`, so ingesting the same
//! file twice produces two independent documents with disjoint chunk ids.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::{chunk_text, ChunkParams, ChunkSource};
use crate::config::Config;
use crate::embedding::{embed_in_batches, Embedder};
use crate::error::IngestError;
use crate::extract::{extract_pages, DocumentFormat};
use crate::index::VectorIndex;
use crate::models::{Chunk, Document, PageText};

/// Result of adding one document to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub filename: String,
    pub chunks_created: usize,
}

/// Result of ingesting every supported file below a directory.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub ingested: Vec<IngestReport>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, IngestError)>,
}

pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    params: ChunkParams,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        params: ChunkParams,
    ) -> Self {
        Self {
            embedder,
            index,
            params,
            batch_size: 64,
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, IngestError> {
        let params = ChunkParams::new(config.chunking.chunk_size, config.chunking.overlap)?;
        Ok(Self::new(embedder, index, params).with_batch_size(config.embedding.batch_size))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Extract and chunk `path` under a new `doc_id`. Nothing is written
    /// to the index.
    pub async fn ingest(&self, path: &Path, filename: &str) -> Result<Document, IngestError> {
        let owned_path = path.to_path_buf();
        let owned_name = filename.to_string();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&owned_path, &owned_name))
            .await
            .map_err(|e| IngestError::ExtractionFailure {
                filename: filename.to_string(),
                reason: e.to_string(),
            })??;

        if pages.is_empty() {
            return Err(IngestError::NoExtractableText(filename.to_string()));
        }

        let doc_id = Uuid::new_v4().to_string();
        Ok(build_document(doc_id, filename, pages, self.params))
    }

    /// Ingest `path`, embed its chunks, and upsert them into the index.
    pub async fn ingest_document(
        &self,
        path: &Path,
        filename: &str,
    ) -> Result<IngestReport, IngestError> {
        let document = self.ingest(path, filename).await?;
        debug!(
            doc_id = %document.doc_id,
            pages = document.pages.len(),
            chunks = document.chunks.len(),
            "chunked document"
        );

        let texts: Vec<String> = document.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await?;
        self.index.upsert(&document.chunks, &vectors).await?;

        info!(
            doc_id = %document.doc_id,
            filename,
            chunks = document.chunks.len(),
            "ingested document"
        );
        Ok(IngestReport {
            doc_id: document.doc_id,
            filename: document.filename,
            chunks_created: document.chunks.len(),
        })
    }

    /// Ingest a file, or every supported file below a directory.
    /// Failures on individual files are collected, not propagated.
    pub async fn ingest_path(&self, root: &Path) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for path in collect_files(root) {
            let filename = display_name(&path);
            if !DocumentFormat::is_supported(&filename) {
                warn!(path = %path.display(), "skipping unsupported file");
                summary.skipped.push(path);
                continue;
            }
            match self.ingest_document(&path, &filename).await {
                Ok(report) => summary.ingested.push(report),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ingestion failed");
                    summary.failed.push((path, e));
                }
            }
        }
        summary
    }

    /// Remove every chunk and document from the index.
    pub async fn reset_knowledge_base(&self) -> Result<(), IngestError> {
        self.index.reset().await?;
        info!("knowledge base reset");
        Ok(())
    }
}

/// Chunk `pages` in order, carrying the chunk index across pages so ids
/// run `{doc_id}-0 .. {doc_id}-(n-1)` over the whole document.
pub fn build_document(
    doc_id: String,
    filename: &str,
    pages: Vec<PageText>,
    params: ChunkParams,
) -> Document {
    let mut chunks: Vec<Chunk> = Vec::new();
    for page in &pages {
        let source = ChunkSource {
            doc_id: &doc_id,
            filename,
            page: page.page,
        };
        let next_index = chunks.len() as u64;
        chunks.extend(chunk_text(source, &page.text, params, next_index));
    }

    Document {
        doc_id,
        filename: filename.to_string(),
        pages,
        chunks,
    }
}

/// Files below `root` in a stable order; `root` itself if it is a file.
fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable path");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
