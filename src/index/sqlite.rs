//! SQLite-backed [`VectorIndex`].
//!
//! Embeddings are stored as BLOBs next to the chunk text and metadata.
//! Queries load every vector and rank by cosine similarity in process,
//! which is fine for the document counts a single-user knowledge base sees.
//!
//! Mutations take an async write lock and run inside one transaction, so
//! an `upsert` racing a `reset` either lands entirely before or entirely
//! after it.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::IndexError;
use crate::models::{Chunk, ChunkMetadata};
use crate::{db, migrate};

use super::{batch_dims, check_aligned, check_dims, rank_hits, IndexHit, IndexStats, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Connect to `db.path` and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        check_aligned(chunks, vectors)?;
        let Some(dims) = batch_dims(vectors)? else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let stored: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunks LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(stored) = stored {
            check_dims(stored as usize, dims)?;
        }

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let meta = &chunk.metadata;
            sqlx::query(
                "INSERT INTO documents (doc_id, filename, created_at) VALUES (?, ?, ?)
                 ON CONFLICT(doc_id) DO NOTHING",
            )
            .bind(&meta.doc_id)
            .bind(&meta.filename)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks (id, doc_id, filename, page, chunk_index, text, dims, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    filename = excluded.filename,
                    page = excluded.page,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    dims = excluded.dims,
                    embedding = excluded.embedding",
            )
            .bind(&chunk.id)
            .bind(&meta.doc_id)
            .bind(&meta.filename)
            .bind(meta.page as i64)
            .bind(meta.chunk_index as i64)
            .bind(&chunk.text)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, doc_id, filename, page, chunk_index, text, dims, embedding
             FROM chunks ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let dims: i64 = row.get("dims");
            check_dims(dims as usize, vector.len())?;
            let blob: Vec<u8> = row.get("embedding");
            let page: i64 = row.get("page");
            let chunk_index: i64 = row.get("chunk_index");
            hits.push(IndexHit {
                similarity: cosine_similarity(vector, &blob_to_vec(&blob)),
                chunk: Chunk {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        filename: row.get("filename"),
                        doc_id: row.get("doc_id"),
                        page: page as u32,
                        chunk_index: chunk_index as u64,
                    },
                },
            });
        }

        Ok(rank_hits(hits, top_k))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexStats {
            documents: documents as usize,
            chunks: chunks as usize,
        })
    }
}
