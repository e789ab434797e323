//! # Focus Harness
//!
//! A retrieval-augmented answer engine. A query is rewritten into a
//! standalone search query, sent to a SearXNG metasearch backend,
//! optionally reranked by embedding similarity, and answered by a
//! language model that cites the numbered results. Answers stream as
//! typed events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Rewrite  │──▶│  Search  │──▶│  Rerank  │──▶│ Generate │──▶ events
//! │  (LLM)   │   │ (SearXNG)│   │ (embed)  │   │  (LLM)   │
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘
//!        ▲ focus mode: prompts, engines, language, rerank policy
//!        │
//!   ┌────┴─────┐       ┌──────────┐
//!   │   CLI    │       │   HTTP   │
//!   │ (focus)  │       │  (SSE)   │
//!   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! focus modes                                   # list focus modes
//! focus ask "What is the capital of France?"    # stream a cited answer
//! focus ask "best rust web framework" --mode reddit
//! focus serve                                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chat, search result, document and event types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`prompt`] | Prompt messages, templates and rendering |
//! | [`llm`] | Language model trait and OpenAI-compatible adapter |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Search gateway (SearXNG) |
//! | [`similarity`] | Cosine similarity |
//! | [`rerank`] | Similarity reranking |
//! | [`rewrite`] | History-aware query rewriting |
//! | [`generate`] | Citation context and answer generation |
//! | [`focus`] | Focus modes and their registry |
//! | [`pipeline`] | Orchestrator and event stream |
//! | [`media`] | Image and video search |
//! | [`suggestions`] | Follow-up suggestions |
//! | [`services`] | Shared capability handles |
//! | [`server`] | HTTP server |
//! | [`logging`] | Tracing subscriber setup |
//! | [`mock`] | Deterministic capability mocks |

pub mod config;
pub mod embedding;
pub mod error;
pub mod focus;
pub mod generate;
pub mod llm;
pub mod logging;
pub mod media;
pub mod mock;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod rerank;
pub mod rewrite;
pub mod search;
pub mod server;
pub mod services;
pub mod similarity;
pub mod suggestions;
