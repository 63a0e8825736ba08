//! # docchat
//!
//! Chat with your documents: upload a PDF, TXT or DOCX file and ask questions
//! that are answered only from its content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │ Extract  │──▶│  Chunk   │──▶│  Embed   │──▶│ Vector Index│
//! │ pdf/docx │   │ overlap  │   │ provider │   │  (SQLite)   │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬──────┘
//!                                                     │
//!                          ┌──────────────────────────┤
//!                          ▼                          ▼
//!                   ┌─────────────┐            ┌─────────────┐
//!                   │  Retriever  │──▶ LLM     │ Conversation│
//!                   │ gate+refuse │            │     Log     │
//!                   └─────────────┘            └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat build ./notice.pdf          # build the index
//! docchat ask "What is the deadline?" # grounded answer or refusal
//! docchat serve                       # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / TXT / DOCX text extraction |
//! | [`chunk`] | Recursive overlap-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language-model provider abstraction |
//! | [`index`] | Persistent vector index with atomic snapshot publication |
//! | [`ingest`] | Upload → index pipeline |
//! | [`retriever`] | Sufficiency gate, grounded prompt, refusal normalization |
//! | [`conversation`] | Per-conversation chat history |
//! | [`summarize`] | Structured legal-document summaries |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod server;
pub mod summarize;
