//! Error taxonomy for docchat.
//!
//! Every failure a caller can trigger maps to one [`DocChatError`] variant,
//! so the CLI and the HTTP server can turn it into a distinct, actionable
//! message. The retriever's refusal is not an error; it is a normal answer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the docchat pipeline.
#[derive(Debug, Error)]
pub enum DocChatError {
    /// The file extension is outside the supported set.
    #[error("unsupported file type: '{0}' (supported: .pdf, .txt, .docx)")]
    UnsupportedFormat(String),

    /// Extraction or chunking produced nothing usable.
    #[error("the document is empty or could not be processed")]
    EmptyDocument,

    /// Retrieval was attempted before any index was built.
    #[error("no vector index found at {}; upload a document to build it first", .0.display())]
    IndexNotFound(PathBuf),

    /// An embedding or language-model call failed.
    #[error("{provider} provider error: {message}")]
    Provider {
        /// Provider label (e.g. `"openai"`, `"gemini"`).
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Query-time embedding configuration differs from the index's.
    #[error(
        "embedding mismatch: index was built with '{index_model}' ({index_dims} dims) \
         but the query uses '{query_model}' ({query_dims} dims); rebuild the index"
    )]
    EmbeddingMismatch {
        index_model: String,
        index_dims: usize,
        query_model: String,
        query_dims: usize,
    },

    /// Chunk size / overlap parameters are unusable.
    #[error("invalid chunking parameters: {0}")]
    InvalidChunking(String),

    /// A chat referenced a conversation id this process never issued.
    #[error("unknown conversation '{0}'; upload a document first")]
    UnknownConversation(String),

    /// The index file could not be read or written.
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DocChatError {
    /// Shorthand for a [`DocChatError::Provider`] error.
    pub fn provider(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DocChatError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

/// A convenience result type for docchat operations.
pub type Result<T> = std::result::Result<T, DocChatError>;
