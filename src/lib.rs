//! # docsage
//!
//! Retrieval-augmented question answering over a private document
//! collection.
//!
//! Documents are split into overlapping chunks, embedded, and stored in a
//! vector index. A question is contextualized against the chat history,
//! matched against the index, reranked, and answered by a text-generation
//! service. The answer streams back as NDJSON events alongside citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │ PDF/DOCX/ │──▶│ Extract +    │──▶│ Vector index │
//! │ PPTX/TXT  │   │ Chunk+Embed  │   │ (SQLite)     │
//! └───────────┘   └──────────────┘   └──────┬───────┘
//!                                           │
//!   question ──▶ rewrite ──▶ retrieve ◀─────┘
//!                              │
//!                           rerank ──▶ assemble ──▶ generate ──▶ NDJSON events
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber set-up |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Page-aware text extraction |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index abstraction and backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`rewrite`] | Follow-up question rewriting |
//! | [`retrieve`] | Candidate retrieval |
//! | [`rerank`] | Cross-encoder reranking with fallback |
//! | [`context`] | Prompt assembly |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`protocol`] | Outbound event protocol |
//! | [`pipeline`] | Query pipeline state machine |
//! | [`services`] | Collaborator wiring |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod protocol;
pub mod rerank;
pub mod retrieve;
pub mod rewrite;
pub mod server;
pub mod services;
