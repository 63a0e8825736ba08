//! Grounded question answering over the vector index.
//!
//! [`Retriever::answer`] runs one query through the pipeline:
//!
//! ```text
//! query ──▶ embed ──▶ top-k search ──▶ sufficiency gate ──▶ prompt ──▶ LLM
//!                                            │                          │
//!                                            ▼                          ▼
//!                                         REFUSAL            refusal normalization
//! ```
//!
//! The gate refuses without calling the model when the retrieved context is
//! too thin. Replies that read like a refusal are replaced with the canonical
//! [`REFUSAL`] text so clients can match on it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::index::IndexStore;
use crate::llm::LanguageModel;
use crate::models::ScoredChunk;

/// Canonical reply when the knowledge base cannot answer.
pub const REFUSAL: &str =
    "Sorry it is not present in knowledge base, use google to get answer of general query";

/// Separator between retrieved chunks in the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// How an [`Answer`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The model's reply, passed through unchanged.
    Generated,
    /// Refused by the sufficiency gate; the model was not called.
    InsufficientContext,
    /// The model refused and its reply was replaced by [`REFUSAL`].
    NormalizedRefusal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub outcome: AnswerOutcome,
    /// Retrieved chunks the answer was grounded on (empty when none were found).
    pub sources: Vec<ScoredChunk>,
    /// Version of the index snapshot that served the query.
    pub index_version: String,
}

impl Answer {
    pub fn is_refusal(&self) -> bool {
        self.outcome != AnswerOutcome::Generated
    }
}

/// Render the grounding prompt for `question` over `context`.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant. Use ONLY the provided context to answer the question.\n\
         If the answer is not contained in the context, reply exactly: {REFUSAL}.\n\n\
         Context:\n{context}\n\n\
         Question:\n{question}\n\n\
         Answer:"
    )
}

/// True when `reply` reads like a knowledge-base refusal.
///
/// Substring match on the lowercased reply: it also fires on a real answer
/// that happens to contain both phrases, and misses refusals worded
/// differently.
pub fn is_refusal_reply(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    lower.contains("sorry") && lower.contains("knowledge base")
}

pub struct Retriever {
    store: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Answer `query` from the current index snapshot.
    ///
    /// # Errors
    ///
    /// [`IndexNotFound`](crate::error::DocChatError::IndexNotFound) before the
    /// first build, `EmbeddingMismatch` when the index was built with another
    /// model, and `Provider` when embedding or generation fails.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let index = self.store.load(self.embedder.as_ref()).await?;
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let sources = index.search_vector(&vector, self.config.top_k)?;
        let index_version = index.version().to_string();

        let joined = sources
            .iter()
            .map(|s| s.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let context_chars = joined.trim().chars().count();

        if sources.is_empty() || context_chars < self.config.min_context_chars {
            info!(
                retrieved = sources.len(),
                context_chars,
                min = self.config.min_context_chars,
                "insufficient context, refusing"
            );
            return Ok(Answer {
                text: REFUSAL.to_string(),
                outcome: AnswerOutcome::InsufficientContext,
                sources,
                index_version,
            });
        }

        let context = sources
            .iter()
            .map(|s| s.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let prompt = build_prompt(&context, query);
        debug!(chunks = sources.len(), prompt_chars = prompt.len(), model = self.llm.model_name(), "calling model");

        let reply = self.llm.complete(&prompt).await?;

        if self.config.normalize_refusals && is_refusal_reply(&reply) {
            debug!(reply = %reply, "normalized model refusal");
            return Ok(Answer {
                text: REFUSAL.to_string(),
                outcome: AnswerOutcome::NormalizedRefusal,
                sources,
                index_version,
            });
        }

        Ok(Answer {
            text: reply,
            outcome: AnswerOutcome::Generated,
            sources,
            index_version,
        })
    }
}
