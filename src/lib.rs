//! # KnowledgeCast
//!
//! A session-scoped retrieval-augmented generation backend.
//!
//! Users add sources to a session (documents, audio, web pages, YouTube
//! videos, pasted text), then chat with citations over them or turn one
//! source into a two-speaker podcast script, optionally voiced.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Producers  │──▶│   Ingest    │──▶│ Vector store │
//! │ doc/audio/  │   │ tag+embed+  │   │ per session  │
//! │ web/youtube │   │ insert      │   └──────┬───────┘
//! └─────────────┘   └─────────────┘          │
//!                                   ┌────────┴────────┐
//!                                   ▼                 ▼
//!                              ┌─────────┐      ┌──────────┐
//!                              │  Chat   │      │ Podcast  │
//!                              │  (RAG)  │      │ (studio) │
//!                              └─────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`error`] | Service error taxonomy |
//! | [`models`] | Chunks, citations, manifest entries |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`extract`] | Text extraction from PDF, DOCX, HTML, text |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Per-session vector stores |
//! | [`producers`] | Source-type specific chunk producers |
//! | [`generation`] | Text generation backends |
//! | [`rag`] | Retrieval and grounded answering |
//! | [`podcast`] | Script writing and audio rendering |
//! | [`memory`] | Conversation memory |
//! | [`services`] | Process-wide service handles |
//! | [`session`] / [`sessions`] | Session state and registry |
//! | [`ingest`] | Ingestion coordinator |
//! | [`chat`] | Chat over a session |
//! | [`studio`] | Podcast generation for a source |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod podcast;
pub mod producers;
pub mod rag;
pub mod server;
pub mod services;
pub mod session;
pub mod sessions;
pub mod store;
pub mod studio;
