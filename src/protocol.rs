//! Outbound event protocol of the query pipeline.
//!
//! A query produces a sequence of newline-delimited JSON objects, each of
//! exactly one shape:
//!
//! ```text
//! {"status": "Searching documents..."}
//! {"citations": [{"filename": "a.pdf", "page": 3, "chunk_index": 12, "excerpt": "...", "score": 0.83}]}
//! {"chunk": "The refund window is "}
//! {"error": "answer generation failed: ..."}
//! ```
//!
//! Ordering is `status*, citations, status*, chunk*` followed by an optional
//! terminal `error`. Exactly one `citations` event is emitted per successful
//! query and it precedes every `chunk`.

use serde::{Deserialize, Serialize};

use crate::models::RetrievedCandidate;

/// A retrieved chunk exposed to the caller as evidence for the answer.
///
/// `score` is the reranker relevance when reranking succeeded and the
/// index cosine similarity otherwise. The two are on different scales;
/// compare scores only within one citations event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub filename: String,
    pub page: u32,
    pub chunk_index: u64,
    pub excerpt: String,
    pub score: f32,
}

impl Citation {
    /// Build a citation, cutting the excerpt to `max_chars` characters
    /// (0 keeps the whole chunk text).
    pub fn from_candidate(c: &RetrievedCandidate, max_chars: usize) -> Self {
        let excerpt = if max_chars > 0 && c.excerpt.chars().count() > max_chars {
            let mut cut: String = c.excerpt.chars().take(max_chars).collect();
            cut.push_str("...");
            cut
        } else {
            c.excerpt.clone()
        };
        Self {
            filename: c.filename.clone(),
            page: c.page,
            chunk_index: c.chunk_index,
            excerpt,
            score: c.score(),
        }
    }
}

impl From<&RetrievedCandidate> for Citation {
    fn from(c: &RetrievedCandidate) -> Self {
        Self::from_candidate(c, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Status(String),
    Citations(Vec<Citation>),
    Chunk(String),
    /// Terminal failure marker. Text already streamed stays valid.
    Error(String),
}

impl StreamEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }

    pub fn is_terminal_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// One NDJSON line, newline included.
    pub fn to_ndjson_line(&self) -> String {
        // Every variant holds only strings, numbers and vectors of those,
        // which serde_json always serializes.
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "error": format!("failed to encode event: {}", e) }).to_string()
        });
        line.push('\n');
        line
    }
}
