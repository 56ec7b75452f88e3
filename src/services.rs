//! Wiring of collaborators into the two pipelines.
//!
//! [`Services::from_config`] builds the production stack (SQLite index,
//! configured embedder, reranker and generator). [`Services::new`] takes
//! the collaborators directly, which is what tests use.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::generation::{create_generator, Generator};
use crate::index::{IndexStats, SqliteIndex, VectorIndex};
use crate::ingest::IngestionPipeline;
use crate::pipeline::QueryPipeline;
use crate::rerank::{create_reranker, Reranker};

pub struct Services {
    pub config: Arc<Config>,
    pub index: Arc<dyn VectorIndex>,
    pub ingestion: Arc<IngestionPipeline>,
    pub query: Arc<QueryPipeline>,
}

impl Services {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Reranker,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let ingestion = IngestionPipeline::from_config(&config, embedder.clone(), index.clone())?;
        let query = QueryPipeline::new(
            embedder,
            index.clone(),
            Arc::new(reranker),
            generator,
            &config.retrieval,
        );
        Ok(Self {
            config: Arc::new(config),
            index,
            ingestion: Arc::new(ingestion),
            query: Arc::new(query),
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::open(config).await?);
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let reranker = create_reranker(&config.reranker);
        Self::new(config.clone(), embedder, index, reranker, generator)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(self.index.stats().await?)
    }
}
