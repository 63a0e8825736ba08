//! Document ingestion: extract → chunk → embed → publish.
//!
//! [`ingest_document`] is the single path by which an uploaded file becomes
//! the current index, used by both the CLI `build` command and the
//! `/upload-and-build/` endpoint. [`plan_document`] runs the same checks
//! without embedding, for `build --dry-run`; [`publish_plan`] finishes a plan.

use serde::Serialize;
use tracing::info;

use crate::chunk::Chunker;
use crate::embedding::EmbeddingProvider;
use crate::error::{DocChatError, Result};
use crate::extract::{extract_text, DocumentFormat};
use crate::index::IndexStore;
use crate::models::Chunk;

/// Outcome of a successful ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub format: &'static str,
    pub extracted_chars: usize,
    pub chunk_count: usize,
    /// Total records in the published index (larger than `chunk_count` in
    /// accumulate mode).
    pub record_count: usize,
    pub index_version: String,
}

/// What an ingest would do, without embedding or writing anything.
#[derive(Debug, Clone)]
pub struct IngestPlan {
    pub source: String,
    pub format: DocumentFormat,
    pub extracted_chars: usize,
    pub chunks: Vec<Chunk>,
}

/// Validate, extract and chunk `bytes` uploaded as `filename`.
pub fn plan_document(filename: &str, bytes: &[u8], chunker: &Chunker) -> Result<IngestPlan> {
    let format = DocumentFormat::from_filename(filename)?;
    let text = extract_text(format, bytes);
    if text.trim().is_empty() {
        return Err(DocChatError::EmptyDocument);
    }

    let chunks = chunker.chunk(filename, &text);
    if chunks.is_empty() {
        return Err(DocChatError::EmptyDocument);
    }

    Ok(IngestPlan {
        source: filename.to_string(),
        format,
        extracted_chars: text.chars().count(),
        chunks,
    })
}

/// Turn an uploaded document into the current index snapshot.
///
/// # Errors
///
/// `UnsupportedFormat` for extensions outside `.pdf`/`.txt`/`.docx`,
/// `EmptyDocument` when no text survives extraction, and whatever the
/// embedding provider or index build reports. On error the previously
/// published index is left untouched.
pub async fn ingest_document(
    filename: &str,
    bytes: &[u8],
    chunker: &Chunker,
    store: &IndexStore,
    embedder: &dyn EmbeddingProvider,
) -> Result<IngestReport> {
    let plan = plan_document(filename, bytes, chunker)?;
    publish_plan(plan, store, embedder).await
}

/// Embed a planned document's chunks and publish them.
///
/// Lets callers run the CPU-bound [`plan_document`] off the async runtime
/// and hand the result back here.
pub async fn publish_plan(
    plan: IngestPlan,
    store: &IndexStore,
    embedder: &dyn EmbeddingProvider,
) -> Result<IngestReport> {
    let chunk_count = plan.chunks.len();

    let index = store.build(embedder, plan.chunks).await?;

    info!(
        source = %plan.source,
        chunks = chunk_count,
        version = %index.version(),
        "ingested document"
    );

    Ok(IngestReport {
        source: plan.source,
        format: plan.format.extension(),
        extracted_chars: plan.extracted_chars,
        chunk_count,
        record_count: index.len(),
        index_version: index.version().to_string(),
    })
}
