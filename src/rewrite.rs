//! Follow-up question contextualization.
//!
//! A follow-up such as "what about the second one?" is useless to the
//! retriever on its own. [`QueryRewriter`] asks the generator to turn it
//! into a standalone question using the last few turns of history.
//!
//! Rewriting is best effort: with no history the query is returned as-is
//! without calling the generator, and any generator failure falls back to
//! the original query.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::generation::Generator;
use crate::models::{recent_turns, ConversationTurn};

/// Number of history turns shown to the rewriter.
pub const REWRITE_HISTORY_TURNS: usize = 4;

pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    pub async fn rewrite(&self, query: &str, history: &[ConversationTurn]) -> String {
        if history.is_empty() {
            return query.to_string();
        }

        let prompt = rewrite_prompt(query, history);
        match self.generator.generate(&prompt, None).await {
            Ok(output) => {
                let standalone = output.trim();
                if standalone.is_empty() {
                    warn!("rewriter returned empty output; using original query");
                    return query.to_string();
                }
                debug!(original = query, standalone, "rewrote query");
                standalone.to_string()
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed; using original query");
                query.to_string()
            }
        }
    }
}

pub fn rewrite_prompt(query: &str, history: &[ConversationTurn]) -> String {
    let mut transcript = String::new();
    for turn in recent_turns(history, REWRITE_HISTORY_TURNS) {
        transcript.push_str(turn.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&turn.content);
        transcript.push('\n');
    }

    format!(
        "Given the following conversation history and a follow-up question, \
         rewrite the follow-up question to be a standalone question that captures all context. \
         Do NOT answer the question, just rewrite it.\n\n\
         Chat History:\n{}\n\
         Follow-up Question: {}\n\n\
         Standalone Question:",
        transcript, query
    )
}
