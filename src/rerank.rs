//! Cross-encoder reranking with fallback.
//!
//! The reranking model is expensive to load, so it is created lazily on
//! first use and shared afterwards. Loading goes through an init-once
//! guard: concurrent first callers wait for the single in-flight load
//! instead of starting their own. A failed load leaves the guard empty and
//! is retried by the next query.
//!
//! Reranking never fails a query. Any [`RerankFailure`] (load error,
//! scoring error, misaligned or non-finite scores) is logged and the
//! retrieval order is kept, truncated to `target_k`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::RerankerConfig;
use crate::error::RerankFailure;
use crate::models::RetrievedCandidate;

/// Relevance scores for `(query, excerpt)` pairs, aligned with `excerpts`.
#[async_trait]
pub trait RerankModel: Send + Sync {
    async fn score(&self, query: &str, excerpts: &[String]) -> Result<Vec<f32>, RerankFailure>;
}

type LoadFuture = BoxFuture<'static, Result<Arc<dyn RerankModel>, RerankFailure>>;
type Loader = Box<dyn Fn() -> LoadFuture + Send + Sync>;

enum Mode {
    Disabled,
    Lazy {
        model: OnceCell<Arc<dyn RerankModel>>,
        loader: Loader,
    },
}

pub struct Reranker {
    mode: Mode,
}

impl Reranker {
    /// Pass candidates through in retrieval order.
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
        }
    }

    /// Use an already-loaded model.
    pub fn with_model(model: Arc<dyn RerankModel>) -> Self {
        Self {
            mode: Mode::Lazy {
                model: OnceCell::new_with(Some(model)),
                loader: boxed_loader(|| async {
                    Err::<Arc<dyn RerankModel>, _>(RerankFailure::new("model already loaded"))
                }),
            },
        }
    }

    /// Load the model with `loader` on first use.
    pub fn lazy<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn RerankModel>, RerankFailure>> + Send + 'static,
    {
        Self {
            mode: Mode::Lazy {
                model: OnceCell::new(),
                loader: boxed_loader(loader),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Lazy { .. })
    }

    /// Reorder `candidates` by relevance and keep the best `target_k`.
    /// Falls back to the first `target_k` in their original order.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedCandidate>,
        target_k: usize,
    ) -> Vec<RetrievedCandidate> {
        if !self.is_enabled() || candidates.is_empty() {
            return truncated(candidates, target_k);
        }

        match self.try_rerank(query, &candidates, target_k).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "reranking failed; keeping retrieval order");
                truncated(candidates, target_k)
            }
        }
    }

    pub async fn try_rerank(
        &self,
        query: &str,
        candidates: &[RetrievedCandidate],
        target_k: usize,
    ) -> Result<Vec<RetrievedCandidate>, RerankFailure> {
        let model = self.model().await?;
        let excerpts: Vec<String> = candidates.iter().map(|c| c.excerpt.clone()).collect();
        let scores = model.score(query, &excerpts).await?;

        if scores.len() != candidates.len() {
            return Err(RerankFailure::new(format!(
                "expected {} scores, got {}",
                candidates.len(),
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(RerankFailure::new("model produced a non-finite score"));
        }

        let mut ranked: Vec<RetrievedCandidate> = candidates
            .iter()
            .zip(scores)
            .map(|(c, score)| RetrievedCandidate {
                rerank_score: Some(score),
                ..c.clone()
            })
            .collect();
        ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));
        ranked.truncate(target_k);
        debug!(kept = ranked.len(), "reranked candidates");
        Ok(ranked)
    }

    async fn model(&self) -> Result<Arc<dyn RerankModel>, RerankFailure> {
        match &self.mode {
            Mode::Disabled => Err(RerankFailure::new("reranker is disabled")),
            Mode::Lazy { model, loader } => model.get_or_try_init(|| loader()).await.cloned(),
        }
    }
}

fn boxed_loader<F, Fut>(loader: F) -> Loader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn RerankModel>, RerankFailure>> + Send + 'static,
{
    Box::new(move || -> LoadFuture { Box::pin(loader()) })
}

fn truncated(mut candidates: Vec<RetrievedCandidate>, target_k: usize) -> Vec<RetrievedCandidate> {
    candidates.truncate(target_k);
    candidates
}

/// Build the reranker selected by `[reranker]`.
pub fn create_reranker(config: &RerankerConfig) -> Reranker {
    if !config.enabled {
        return Reranker::disabled();
    }

    #[cfg(feature = "local-models")]
    {
        let name = config.model.clone();
        Reranker::lazy(move || local::load_shared(name.clone()))
    }

    #[cfg(not(feature = "local-models"))]
    {
        info!(
            model = %config.model,
            "reranker requires the local-models feature; keeping retrieval order"
        );
        Reranker::disabled()
    }
}

#[cfg(feature = "local-models")]
pub use local::FastembedRerankModel;

#[cfg(feature = "local-models")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// fastembed cross-encoder, run on the blocking pool.
    pub struct FastembedRerankModel {
        inner: Arc<Mutex<fastembed::TextRerank>>,
    }

    impl FastembedRerankModel {
        /// Blocking: may download the model on first use.
        pub fn load(name: &str) -> Result<Self, RerankFailure> {
            let kind = to_fastembed_reranker(name)?;
            let model = fastembed::TextRerank::try_new(
                fastembed::RerankInitOptions::new(kind).with_show_download_progress(false),
            )
            .map_err(|e| RerankFailure::new(e.to_string()))?;
            Ok(Self {
                inner: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl RerankModel for FastembedRerankModel {
        async fn score(&self, query: &str, excerpts: &[String]) -> Result<Vec<f32>, RerankFailure> {
            let inner = self.inner.clone();
            let query = query.to_string();
            let excerpts = excerpts.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut model = inner
                    .lock()
                    .map_err(|_| RerankFailure::new("reranker lock poisoned"))?;
                let docs: Vec<&str> = excerpts.iter().map(String::as_str).collect();
                let results = model
                    .rerank(query.as_str(), docs, false, None)
                    .map_err(|e| RerankFailure::new(e.to_string()))?;

                // fastembed returns results sorted by score; restore input order.
                let mut scores = vec![f32::NAN; excerpts.len()];
                for r in results {
                    let slot = scores.get_mut(r.index).ok_or_else(|| {
                        RerankFailure::new(format!("result index {} out of range", r.index))
                    })?;
                    *slot = r.score;
                }
                Ok(scores)
            })
            .await
            .map_err(|e| RerankFailure::new(e.to_string()))?
        }
    }

    pub(super) async fn load_shared(name: String) -> Result<Arc<dyn RerankModel>, RerankFailure> {
        info!(model = %name, "loading reranker model");
        let model = tokio::task::spawn_blocking(move || FastembedRerankModel::load(&name))
            .await
            .map_err(|e| RerankFailure::new(e.to_string()))??;
        Ok(Arc::new(model))
    }

    fn to_fastembed_reranker(name: &str) -> Result<fastembed::RerankerModel, RerankFailure> {
        match name {
            "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
            "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
            "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
            "jina-reranker-v2-base-multilingual" => {
                Ok(fastembed::RerankerModel::JINARerankerV2BaseMultiligual)
            }
            other => Err(RerankFailure::new(format!(
                "unknown reranker model '{}'",
                other
            ))),
        }
    }
}
