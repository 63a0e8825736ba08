//! Core data models used throughout docchat.
//!
//! These types represent the chunks and search results that flow through the
//! ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A contiguous slice of a document's extracted text.
///
/// `start` is the byte offset of `text` inside the extracted text, so two
/// consecutive chunks overlap by `previous.end() - next.start` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Name of the uploaded file the chunk came from.
    pub source: String,
    pub chunk_index: i64,
    pub start: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Byte offset one past the end of this chunk in the extracted text.
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity with the query, in `[-1.0, 1.0]`.
    pub score: f32,
}
