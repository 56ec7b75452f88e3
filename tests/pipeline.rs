mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use common::*;
use docsage::config::RetrievalConfig;
use docsage::context::NO_CONTEXT_MARKER;
use docsage::embedding::{DisabledEmbedder, Embedder};
use docsage::generation::Generator;
use docsage::index::{InMemoryIndex, VectorIndex};
use docsage::models::ConversationTurn;
use docsage::pipeline::{QueryPipeline, QueryRequest};
use docsage::protocol::StreamEvent;
use docsage::rerank::Reranker;

fn retrieval(top_k: usize) -> RetrievalConfig {
    RetrievalConfig {
        top_k,
        excerpt_chars: 0,
    }
}

fn pipeline(
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Reranker,
    generator: Arc<dyn Generator>,
    top_k: usize,
) -> Arc<QueryPipeline> {
    Arc::new(QueryPipeline::new(
        embedder,
        index,
        Arc::new(reranker),
        generator,
        &retrieval(top_k),
    ))
}

async fn collect(pipeline: &Arc<QueryPipeline>, request: QueryRequest) -> Vec<StreamEvent> {
    pipeline.run(request).collect().await
}

fn citations(events: &[StreamEvent]) -> Vec<&Vec<docsage::protocol::Citation>> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Citations(c) => Some(c),
            _ => None,
        })
        .collect()
}

fn chunks(events: &[StreamEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk(c) => Some(c.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn citations_precede_chunks_exactly_once() {
    let generator = ScriptedGenerator::answering(&["Refunds ", "take ", "30 days."]);
    let p = pipeline(
        KeywordEmbedder::new(),
        seeded_index().await,
        Reranker::with_model(Arc::new(LengthReranker)),
        generator.clone(),
        2,
    );

    let events = collect(&p, QueryRequest::new("How do refunds work?")).await;

    let citation_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, StreamEvent::Citations(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(citation_positions.len(), 1);
    let first_chunk = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Chunk(_)))
        .unwrap();
    assert!(citation_positions[0] < first_chunk);
    assert!(events.iter().all(|e| !e.is_terminal_error()));

    // Fragments are forwarded unchanged and in order.
    assert_eq!(chunks(&events), vec!["Refunds ", "take ", "30 days."]);
    // Nothing but chunks after the first chunk.
    assert!(events[first_chunk..]
        .iter()
        .all(|e| matches!(e, StreamEvent::Chunk(_))));
}

#[tokio::test]
async fn reranked_citations_are_truncated_to_top_k() {
    let p = pipeline(
        KeywordEmbedder::new(),
        seeded_index().await,
        Reranker::with_model(Arc::new(LengthReranker)),
        ScriptedGenerator::answering(&["ok"]),
        2,
    );
    let events = collect(&p, QueryRequest::new("refund")).await;
    let cited = citations(&events)[0];
    assert_eq!(cited.len(), 2);
    // Longest refund passages first, scored by the reranker.
    assert_eq!(cited[0].chunk_index, 1);
    assert_eq!(cited[0].filename, "policy.pdf");
    assert_eq!(cited[0].page, 2);
    assert!(cited[0].score >= cited[1].score);
    assert_eq!(cited[0].score, cited[0].excerpt.len() as f32);
}

#[tokio::test]
async fn rerank_failure_keeps_retrieval_order() {
    let embedder = KeywordEmbedder::new();
    let index = seeded_index().await;

    let expected: Vec<String> = index
        .query(&common::keyword_vector("refund"), 2)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.chunk.text)
        .collect();

    let p = pipeline(
        embedder,
        index,
        Reranker::with_model(Arc::new(FailingReranker)),
        ScriptedGenerator::answering(&["fine"]),
        2,
    );
    let events = collect(&p, QueryRequest::new("refund")).await;

    let cited: Vec<String> = citations(&events)[0]
        .iter()
        .map(|c| c.excerpt.clone())
        .collect();
    assert_eq!(cited, expected);
    assert_eq!(chunks(&events), vec!["fine"]);
    assert!(events.iter().all(|e| !e.is_terminal_error()));
}

#[tokio::test]
async fn empty_index_cites_nothing_and_says_so() {
    let generator = ScriptedGenerator::answering(&["I don't know."]);
    let p = pipeline(
        KeywordEmbedder::new(),
        Arc::new(InMemoryIndex::new()),
        Reranker::with_model(Arc::new(LengthReranker)),
        generator.clone(),
        5,
    );
    let events = collect(&p, QueryRequest::new("anything?")).await;

    let cited = citations(&events);
    assert_eq!(cited.len(), 1);
    assert!(cited[0].is_empty());

    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.contains(NO_CONTEXT_MARKER));
    assert!(calls[0].1.as_deref().unwrap().contains("ONLY"));
}

#[tokio::test]
async fn no_history_means_no_rewrite_call() {
    let embedder = KeywordEmbedder::new();
    let generator = ScriptedGenerator::answering(&["a"]);
    let p = pipeline(
        embedder.clone(),
        seeded_index().await,
        Reranker::disabled(),
        generator.clone(),
        3,
    );
    collect(&p, QueryRequest::new("What about leave?")).await;

    assert_eq!(generator.calls().len(), 1);
    assert_eq!(*embedder.seen.lock().unwrap(), vec!["What about leave?".to_string()]);
}

#[tokio::test]
async fn history_rewrites_before_retrieval() {
    let embedder = KeywordEmbedder::new();
    let generator = Arc::new(ScriptedGenerator {
        rewrite_reply: Some("  How long is parental leave?  ".into()),
        fragments: vec!["Sixteen weeks.".into()],
        fail_after_fragments: false,
        calls: Default::default(),
    });
    let p = pipeline(
        embedder.clone(),
        seeded_index().await,
        Reranker::disabled(),
        generator.clone(),
        1,
    );
    let history = vec![
        ConversationTurn::user("Tell me about parental leave"),
        ConversationTurn::assistant("It exists."),
    ];
    let events = collect(&p, QueryRequest::new("how long?").with_history(history)).await;

    assert_eq!(
        *embedder.seen.lock().unwrap(),
        vec!["How long is parental leave?".to_string()]
    );
    let calls = generator.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].1.is_none());
    // The answer prompt carries the original question and the history.
    assert!(calls[1].0.contains("User Question: how long?"));
    assert!(calls[1].0.contains("User: Tell me about parental leave"));
    assert_eq!(citations(&events)[0][0].filename, "handbook.pdf");
}

#[tokio::test]
async fn rewrite_failure_uses_original_query() {
    let embedder = KeywordEmbedder::new();
    let generator = ScriptedGenerator::answering(&["x"]);
    let p = pipeline(
        embedder.clone(),
        seeded_index().await,
        Reranker::disabled(),
        generator,
        1,
    );
    let history = vec![ConversationTurn::user("earlier")];
    let events = collect(&p, QueryRequest::new("refund?").with_history(history)).await;
    assert_eq!(*embedder.seen.lock().unwrap(), vec!["refund?".to_string()]);
    assert_eq!(chunks(&events), vec!["x"]);
}

#[tokio::test]
async fn embedding_failure_ends_with_error_before_citations() {
    let p = pipeline(
        Arc::new(DisabledEmbedder),
        seeded_index().await,
        Reranker::disabled(),
        ScriptedGenerator::answering(&["never"]),
        2,
    );
    let events = collect(&p, QueryRequest::new("refund")).await;
    assert!(citations(&events).is_empty());
    assert!(chunks(&events).is_empty());
    let last = events.last().unwrap();
    assert!(last.is_terminal_error());
    assert_eq!(events.iter().filter(|e| e.is_terminal_error()).count(), 1);
}

#[tokio::test]
async fn generation_failure_keeps_streamed_text() {
    let generator = Arc::new(ScriptedGenerator {
        rewrite_reply: None,
        fragments: vec!["Partial ".into(), "answer".into()],
        fail_after_fragments: true,
        calls: Default::default(),
    });
    let p = pipeline(
        KeywordEmbedder::new(),
        seeded_index().await,
        Reranker::disabled(),
        generator,
        2,
    );
    let events = collect(&p, QueryRequest::new("refund")).await;
    assert_eq!(chunks(&events), vec!["Partial ", "answer"]);
    match events.last().unwrap() {
        StreamEvent::Error(msg) => assert!(msg.contains("connection reset")),
        other => panic!("expected error marker, got {:?}", other),
    }
}

#[tokio::test]
async fn disconnect_stops_generation() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        KeywordEmbedder::new(),
        seeded_index().await,
        Reranker::disabled(),
        Arc::new(EndlessGenerator {
            pulled: pulled.clone(),
        }),
        2,
    );

    let mut events = p.run(QueryRequest::new("refund"));
    loop {
        match events.next().await {
            Some(StreamEvent::Chunk(_)) => break,
            Some(_) => continue,
            None => panic!("stream ended before any chunk"),
        }
    }
    drop(events);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn disconnect_while_generator_connects_abandons_the_call() {
    let abandoned = Arc::new(AtomicBool::new(false));
    let p = pipeline(
        KeywordEmbedder::new(),
        seeded_index().await,
        Reranker::disabled(),
        Arc::new(HangingGenerator {
            abandoned: abandoned.clone(),
        }),
        2,
    );

    let mut events = p.run(QueryRequest::new("refund"));
    loop {
        match events.next().await {
            Some(StreamEvent::Status(msg)) if msg == "Generating answer..." => break,
            Some(_) => continue,
            None => panic!("stream ended before generation"),
        }
    }
    // Let the pipeline enter the pending call before hanging up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!abandoned.load(Ordering::SeqCst));
    drop(events);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(abandoned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn excerpts_are_truncated_for_display_only() {
    let generator = ScriptedGenerator::answering(&["ok"]);
    let p = Arc::new(QueryPipeline::new(
        KeywordEmbedder::new(),
        seeded_index().await,
        Arc::new(Reranker::disabled()),
        generator.clone(),
        &RetrievalConfig {
            top_k: 1,
            excerpt_chars: 6,
        },
    ));
    let events = collect(&p, QueryRequest::new("leave")).await;
    let cited = citations(&events)[0];
    assert_eq!(cited[0].excerpt.chars().count(), 6 + "...".len());
    // The generator still sees the whole passage.
    let full = &generator.calls()[0].0;
    assert!(full.contains("leave monthly.") || full.contains("sixteen weeks."));
}
