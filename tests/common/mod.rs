//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use docsage::embedding::Embedder;
use docsage::error::{EmbeddingError, GenerationError, RerankFailure};
use docsage::generation::{FragmentStream, Generator};
use docsage::index::{InMemoryIndex, VectorIndex};
use docsage::models::{Chunk, ChunkMetadata};
use docsage::rerank::RerankModel;

pub const VOCAB: [&str; 4] = ["refund", "leave", "rust", "python"];

/// Bag-of-words over [`VOCAB`], plus a small bias so no vector is zero.
pub struct KeywordEmbedder {
    pub seen: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCAB
        .iter()
        .map(|w| lower.matches(w).count() as f32 + 0.01)
        .collect()
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Records every call. Calls without a system instruction are rewrite
/// requests and get `rewrite_reply`; answer calls stream `fragments`,
/// optionally followed by an error.
pub struct ScriptedGenerator {
    pub rewrite_reply: Option<String>,
    pub fragments: Vec<String>,
    pub fail_after_fragments: bool,
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedGenerator {
    pub fn answering(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            rewrite_reply: None,
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fail_after_fragments: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), system.map(str::to_string)));

        if system.is_none() {
            return match &self.rewrite_reply {
                Some(reply) => Ok(futures::stream::iter(vec![Ok(reply.clone())]).boxed()),
                None => Err(GenerationError::Unreachable("rewriter offline".into())),
            };
        }

        let mut items: Vec<Result<String, GenerationError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_after_fragments {
            items.push(Err(GenerationError::Stream("connection reset".into())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Streams "tick" forever, counting how many fragments were pulled.
pub struct EndlessGenerator {
    pub pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl Generator for EndlessGenerator {
    fn model_name(&self) -> &str {
        "endless"
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        let pulled = self.pulled.clone();
        Ok(futures::stream::unfold(pulled, |pulled| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pulled.fetch_add(1, Ordering::SeqCst);
            Some((Ok("tick".to_string()), pulled))
        })
        .boxed())
    }
}

/// Answer calls hang while "connecting"; `abandoned` flips once the
/// pending call is dropped.
pub struct HangingGenerator {
    pub abandoned: Arc<AtomicBool>,
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for HangingGenerator {
    fn model_name(&self) -> &str {
        "hanging"
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        if system.is_none() {
            return Err(GenerationError::Unreachable("rewriter offline".into()));
        }
        let _guard = SetOnDrop(self.abandoned.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(futures::stream::empty().boxed())
    }
}

/// Scores by excerpt length, longest first.
pub struct LengthReranker;

#[async_trait]
impl RerankModel for LengthReranker {
    async fn score(&self, _query: &str, excerpts: &[String]) -> Result<Vec<f32>, RerankFailure> {
        Ok(excerpts.iter().map(|e| e.len() as f32).collect())
    }
}

pub struct FailingReranker;

#[async_trait]
impl RerankModel for FailingReranker {
    async fn score(&self, _query: &str, _excerpts: &[String]) -> Result<Vec<f32>, RerankFailure> {
        Err(RerankFailure::new("cross-encoder unavailable"))
    }
}

pub fn chunk(doc: &str, idx: u64, page: u32, text: &str) -> Chunk {
    Chunk {
        id: Chunk::chunk_id(doc, idx),
        text: text.to_string(),
        metadata: ChunkMetadata {
            filename: format!("{}.pdf", doc),
            doc_id: doc.to_string(),
            page,
            chunk_index: idx,
        },
    }
}

/// An index holding a handful of chunks about refunds, leave, and Rust.
pub async fn seeded_index() -> Arc<InMemoryIndex> {
    let chunks = vec![
        chunk("policy", 0, 1, "Refund requests are accepted within 30 days."),
        chunk("policy", 1, 2, "A refund is paid to the original card. Refund fees apply."),
        chunk("policy", 2, 3, "Refund"),
        chunk("handbook", 0, 1, "Employees accrue leave monthly."),
        chunk("handbook", 1, 4, "Parental leave lasts sixteen weeks."),
        chunk("guide", 0, 1, "Rust ownership rules prevent data races."),
    ];
    let vectors: Vec<Vec<f32>> = chunks.iter().map(|c| keyword_vector(&c.text)).collect();
    let index = Arc::new(InMemoryIndex::new());
    index.upsert(&chunks, &vectors).await.unwrap();
    index
}
