//! # docchat CLI
//!
//! Upload a document, ask questions grounded in it, or summarize it.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat build <file>` | Extract, chunk, embed and publish the vector index |
//! | `docchat search "<query>"` | Show the most similar chunks |
//! | `docchat ask "<question>"` | Answer from the index (or refuse) |
//! | `docchat summarize <file>` | Structured summary of a legal document |
//! | `docchat serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! docchat build ./notice.pdf
//! docchat ask "What is the last date to respond?"
//! docchat summarize ./notice.pdf --language Hindi
//! RUST_LOG=docchat=debug docchat serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docchat::{commands, config, server};

/// docchat: chat with your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Chat with your documents: answers grounded only in what you upload",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from a document (.pdf, .txt, .docx).
    ///
    /// In the default `replace` mode the new index supersedes the previous
    /// one; with `[index] mode = "accumulate"` the document is added to it.
    Build {
        file: PathBuf,

        /// Override `[chunking].chunk_size` (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override `[chunking].chunk_overlap` (characters).
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Extract and chunk only; do not embed or write the index.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the chunks most similar to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a question answered only from the indexed document.
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Summarize a document into a structured JSON report.
    Summarize {
        file: PathBuf,

        /// Language of the summary.
        #[arg(long, default_value = "English")]
        language: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            file,
            chunk_size,
            chunk_overlap,
            dry_run,
        } => {
            commands::run_build(&cfg, &file, chunk_size, chunk_overlap, dry_run).await?;
        }
        Commands::Search { query, top_k } => {
            commands::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ask { question, top_k } => {
            commands::run_ask(&cfg, &question, top_k).await?;
        }
        Commands::Summarize { file, language } => {
            commands::run_summarize(&cfg, &file, &language).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
