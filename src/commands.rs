//! CLI command implementations.
//!
//! Each `run_*` function backs one `docchat` subcommand and prints its result
//! to stdout. Diagnostics go through `tracing` to stderr.

use anyhow::{Context, Result};
use std::path::Path;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::DocChatError;
use crate::extract::{extract_text, DocumentFormat};
use crate::index::IndexStore;
use crate::ingest::{ingest_document, plan_document};
use crate::llm::create_language_model;
use crate::retriever::{AnswerOutcome, Retriever};
use crate::summarize::{extract_last_date, summarize_document};

fn store_for(config: &Config) -> IndexStore {
    IndexStore::new(config.index.path.clone(), config.index.mode)
        .with_batch_size(config.embedding.batch_size)
}

fn read_document(path: &Path) -> Result<(String, Vec<u8>)> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((filename, bytes))
}

/// `docchat build <file>`: extract, chunk, embed and publish the index.
pub async fn run_build(
    config: &Config,
    file: &Path,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let chunker = Chunker::new(
        chunk_size.unwrap_or(config.chunking.chunk_size),
        chunk_overlap.unwrap_or(config.chunking.chunk_overlap),
    )?;
    let (filename, bytes) = read_document(file)?;

    if dry_run {
        let plan = plan_document(&filename, &bytes, &chunker)?;
        println!("build {} (dry-run)", plan.source);
        println!("  format: {}", plan.format.extension());
        println!("  extracted chars: {}", plan.extracted_chars);
        println!("  chunks: {}", plan.chunks.len());
        println!(
            "  chunk size / overlap: {} / {}",
            chunker.chunk_size(),
            chunker.chunk_overlap()
        );
        return Ok(());
    }

    let embedder = create_provider(&config.embedding)?;
    let store = store_for(config);
    let report = ingest_document(&filename, &bytes, &chunker, &store, embedder.as_ref()).await?;

    println!("build {}", report.source);
    println!("  format: {}", report.format);
    println!("  extracted chars: {}", report.extracted_chars);
    println!("  chunks: {}", report.chunk_count);
    println!("  records in index: {}", report.record_count);
    println!("  index: {}", store.path().display());
    println!("  index version: {}", report.index_version);
    println!("ok");
    Ok(())
}

/// `docchat search "<query>"`: print the top-k chunks with scores.
pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let store = store_for(config);
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let hits = store.search(embedder.as_ref(), query, top_k).await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            hit.score,
            hit.chunk.source,
            hit.chunk.chunk_index
        );
        println!("    {}", snippet(&hit.chunk.text, 200));
    }
    Ok(())
}

/// `docchat ask "<question>"`: answer from the index.
pub async fn run_ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let llm = create_language_model(&config.llm)?;
    let mut retrieval = config.retrieval.clone();
    if let Some(k) = top_k {
        anyhow::ensure!(k >= 1, "--top-k must be >= 1");
        retrieval.top_k = k;
    }

    let retriever = Retriever::new(store_for(config).into(), embedder, llm, retrieval);
    let answer = retriever.answer(question).await?;

    println!("{}", answer.text);
    if answer.outcome == AnswerOutcome::Generated && !answer.sources.is_empty() {
        println!();
        println!("sources:");
        for source in &answer.sources {
            println!(
                "  {} #{} ({:.3})",
                source.chunk.source, source.chunk.chunk_index, source.score
            );
        }
    }
    Ok(())
}

/// `docchat summarize <file>`: structured summary as JSON, plus the last action date.
pub async fn run_summarize(config: &Config, file: &Path, language: &str) -> Result<()> {
    let (filename, bytes) = read_document(file)?;
    let format = DocumentFormat::from_filename(&filename)?;
    let text = extract_text(format, &bytes);
    if text.trim().is_empty() {
        return Err(DocChatError::EmptyDocument.into());
    }

    let llm = create_language_model(&config.llm)?;
    let summary = summarize_document(llm.as_ref(), &text, language).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match extract_last_date(llm.as_ref(), &text).await {
        Some(date) => println!("last date: {}", date.format("%Y-%m-%d")),
        None => println!("last date: none found"),
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
