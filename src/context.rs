//! Prompt assembly.
//!
//! Each candidate becomes a labeled source block so the generator (and
//! anyone reading the prompt) can attribute statements to a file and page:
//!
//! ```text
//! -- Source: handbook.pdf (Page 4)
//! Employees accrue 1.5 days of leave per month...
//! ```
//!
//! An empty candidate list yields [`NO_CONTEXT_MARKER`] instead of an empty
//! context. The answer-only-from-context rule lives in the system
//! instruction, never in the user message.

use crate::models::{recent_turns, ConversationTurn, RetrievedCandidate};

pub const NO_CONTEXT_MARKER: &str = "No relevant context found.";

/// Number of history turns included in the answer prompt.
pub const ANSWER_HISTORY_TURNS: usize = 6;

pub const SYSTEM_INSTRUCTION: &str = "You are an expert AI assistant. Your goal is to provide \
comprehensive, detailed, and well-explained answers based on the context. Do not be brief. \
Elaborate on the key points, provide examples from the text if available, and ensure the \
answer is thorough. Answer based ONLY on the provided context.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(
        &self,
        candidates: &[RetrievedCandidate],
        history: &[ConversationTurn],
        question: &str,
    ) -> Prompt {
        let mut transcript = String::new();
        for turn in recent_turns(history, ANSWER_HISTORY_TURNS) {
            transcript.push_str(turn.role.label());
            transcript.push_str(": ");
            transcript.push_str(&turn.content);
            transcript.push('\n');
        }

        let user = format!(
            "Context:\n{}\n\nChat History:\n{}\n\nUser Question: {}\n\nAnswer:",
            context_block(candidates),
            transcript,
            question
        );

        Prompt {
            system: SYSTEM_INSTRUCTION.to_string(),
            user,
        }
    }
}

/// Source blocks for `candidates`, or the no-context marker.
pub fn context_block(candidates: &[RetrievedCandidate]) -> String {
    let mut block = String::new();
    for c in candidates {
        block.push_str(&format!(
            "-- Source: {} (Page {})\n{}\n\n",
            c.filename, c.page, c.excerpt
        ));
    }
    if block.trim().is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(filename: &str, page: u32, excerpt: &str) -> RetrievedCandidate {
        RetrievedCandidate {
            chunk_id: "d-0".into(),
            filename: filename.into(),
            page,
            chunk_index: 0,
            excerpt: excerpt.into(),
            similarity: 0.9,
            rerank_score: None,
        }
    }

    #[test]
    fn sources_are_attributed() {
        let prompt = ContextAssembler::new().assemble(
            &[
                candidate("handbook.pdf", 4, "Leave accrues monthly."),
                candidate("faq.docx", 1, "Refunds take 5 days."),
            ],
            &[],
            "How does leave work?",
        );
        assert!(prompt
            .user
            .contains("-- Source: handbook.pdf (Page 4)\nLeave accrues monthly.\n\n"));
        assert!(prompt.user.contains("-- Source: faq.docx (Page 1)\nRefunds take 5 days."));
        assert!(prompt.user.ends_with("User Question: How does leave work?\n\nAnswer:"));
        assert!(!prompt.user.contains(NO_CONTEXT_MARKER));
    }

    #[test]
    fn empty_candidates_use_marker() {
        let prompt = ContextAssembler::new().assemble(&[], &[], "anything?");
        assert!(prompt.user.starts_with(&format!("Context:\n{}", NO_CONTEXT_MARKER)));
    }

    #[test]
    fn instruction_is_system_level_only() {
        let prompt = ContextAssembler::new().assemble(&[], &[], "q");
        assert!(prompt.system.contains("ONLY on the provided context"));
        assert!(!prompt.user.contains("ONLY on the provided context"));
    }

    #[test]
    fn history_window_is_bounded() {
        let history: Vec<_> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(format!("q{}", i))
                } else {
                    ConversationTurn::assistant(format!("a{}", i))
                }
            })
            .collect();
        let prompt = ContextAssembler::new().assemble(&[], &history, "next");
        assert!(!prompt.user.contains("q2\n"));
        assert!(prompt.user.contains("User: q4\n"));
        assert!(prompt.user.contains("Assistant: a9\n"));
    }
}
