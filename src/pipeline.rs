//! Query pipeline orchestration.
//!
//! One [`QueryPipeline::run`] call drives a single request through
//!
//! ```text
//! Rewriting -> Retrieving -> Reranking -> Assembling -> Generating -> Done
//!      \____________\____________\____________\____________\__-> Error
//! ```
//!
//! and yields the [`StreamEvent`]s it produces. The work happens in a
//! spawned task that pushes events into a bounded channel; the returned
//! stream is the receiving end. Dropping the stream closes the channel,
//! which stops the task at its next send or while it waits on the
//! generator, dropping the generation stream with it.
//!
//! Event order is `Status*, Citations, Status*, Chunk*` with an optional
//! terminal `Error`. Rewrite and rerank failures degrade silently; embedding,
//! index and generation failures end the stream with `Error`.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::config::RetrievalConfig;
use crate::context::ContextAssembler;
use crate::embedding::Embedder;
use crate::error::QueryError;
use crate::generation::Generator;
use crate::index::VectorIndex;
use crate::models::ConversationTurn;
use crate::protocol::{Citation, StreamEvent};
use crate::rerank::Reranker;
use crate::retrieve::Retriever;
use crate::rewrite::QueryRewriter;

const EVENT_BUFFER: usize = 32;

/// A question plus the caller-maintained chat history, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_history(mut self, messages: Vec<ConversationTurn>) -> Self {
        self.messages = messages;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Rewriting,
    Retrieving,
    Reranking,
    Assembling,
    Generating,
    Done,
    Error,
}

/// Why a run stopped before `Done`.
enum Halt {
    /// The consumer went away; nothing more to say.
    Disconnected,
    Failed(QueryError),
}

impl From<QueryError> for Halt {
    fn from(e: QueryError) -> Self {
        Halt::Failed(e)
    }
}

struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    state: QueryState,
}

impl Emitter {
    fn enter(&mut self, state: QueryState) -> Result<(), Halt> {
        if self.tx.is_closed() {
            return Err(Halt::Disconnected);
        }
        debug!(from = ?self.state, to = ?state, "query state");
        self.state = state;
        Ok(())
    }

    async fn send(&self, event: StreamEvent) -> Result<(), Halt> {
        self.tx.send(event).await.map_err(|_| Halt::Disconnected)
    }
}

pub struct QueryPipeline {
    rewriter: QueryRewriter,
    retriever: Retriever,
    reranker: Arc<Reranker>,
    assembler: ContextAssembler,
    generator: Arc<dyn Generator>,
    top_k: usize,
    excerpt_chars: usize,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        reranker: Arc<Reranker>,
        generator: Arc<dyn Generator>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            rewriter: QueryRewriter::new(generator.clone()),
            retriever: Retriever::new(embedder, index),
            reranker,
            assembler: ContextAssembler::new(),
            generator,
            top_k: retrieval.top_k,
            excerpt_chars: retrieval.excerpt_chars,
        }
    }

    /// Start a run and return its event stream.
    pub fn run(self: &Arc<Self>, request: QueryRequest) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.execute(request, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Drive one request to completion, sending events to `tx`.
    pub async fn execute(&self, request: QueryRequest, tx: mpsc::Sender<StreamEvent>) {
        let mut emitter = Emitter {
            tx,
            state: QueryState::Rewriting,
        };

        match self.drive(&request, &mut emitter).await {
            Ok(()) => {
                emitter.state = QueryState::Done;
                debug!("query finished");
            }
            Err(Halt::Disconnected) => {
                info!(state = ?emitter.state, "client disconnected; abandoning query");
            }
            Err(Halt::Failed(e)) => {
                error!(state = ?emitter.state, error = %e, "query failed");
                emitter.state = QueryState::Error;
                // The consumer may already be gone.
                let _ = emitter.send(StreamEvent::Error(e.to_string())).await;
            }
        }
    }

    async fn drive(&self, request: &QueryRequest, out: &mut Emitter) -> Result<(), Halt> {
        let history = request.messages.as_slice();

        out.enter(QueryState::Rewriting)?;
        out.send(StreamEvent::status("Contextualizing query...")).await?;
        let standalone = self.rewriter.rewrite(&request.query, history).await;

        out.enter(QueryState::Retrieving)?;
        out.send(StreamEvent::status("Searching documents...")).await?;
        let candidates = self.retriever.retrieve(&standalone, self.top_k).await?;

        out.enter(QueryState::Reranking)?;
        if self.reranker.is_enabled() && !candidates.is_empty() {
            out.send(StreamEvent::status("Reranking results...")).await?;
        }
        let ranked = self
            .reranker
            .rerank(&standalone, candidates, self.top_k)
            .await;

        out.enter(QueryState::Assembling)?;
        let citations = ranked
            .iter()
            .map(|c| Citation::from_candidate(c, self.excerpt_chars))
            .collect();
        out.send(StreamEvent::Citations(citations)).await?;
        let prompt = self.assembler.assemble(&ranked, history, &request.query);

        out.enter(QueryState::Generating)?;
        out.send(StreamEvent::status("Generating answer...")).await?;
        let opened = tokio::select! {
            _ = out.tx.closed() => return Err(Halt::Disconnected),
            opened = self.generator.generate_stream(&prompt.user, Some(&prompt.system)) => opened,
        };
        let mut fragments = opened.map_err(QueryError::from)?;

        loop {
            let next = tokio::select! {
                _ = out.tx.closed() => return Err(Halt::Disconnected),
                next = fragments.next() => next,
            };
            match next {
                Some(Ok(text)) => out.send(StreamEvent::Chunk(text)).await?,
                Some(Err(e)) => return Err(QueryError::from(e).into()),
                None => return Ok(()),
            }
        }
    }
}
