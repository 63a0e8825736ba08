//! HTTP API for uploading documents, chatting with them and summarizing them.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload-and-build/` | Multipart `file`; builds the index, opens a conversation |
//! | `POST` | `/chat/` | `{conversation_id, query}`; answers from the index |
//! | `POST` | `/summarize/` | Multipart `file` + `language`; structured summary |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_not_found", "message": "no vector index found at ..." } }
//! ```
//!
//! Error codes: `unsupported_format`, `empty_document`, `index_not_found`,
//! `unknown_conversation`, `bad_request` (400), `embedding_mismatch` (409),
//! `provider_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::conversation::{ConversationLog, ConversationRegistry};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::DocChatError;
use crate::extract::{extract_text, DocumentFormat};
use crate::index::IndexStore;
use crate::ingest::{plan_document, publish_plan};
use crate::llm::{create_language_model, LanguageModel};
use crate::retriever::{AnswerOutcome, Retriever};
use crate::summarize::{summarize_document, LegalDocSummary};

/// Everything a request handler needs, shared across requests.
pub struct AppContext {
    pub config: Config,
    pub chunker: Chunker,
    pub store: Arc<IndexStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub retriever: Retriever,
    pub conversations: ConversationRegistry,
}

impl AppContext {
    /// Wire up the pipeline around the given providers.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> anyhow::Result<Self> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let store = Arc::new(
            IndexStore::new(config.index.path.clone(), config.index.mode)
                .with_batch_size(config.embedding.batch_size),
        );
        let retriever = Retriever::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            config.retrieval.clone(),
        );
        Ok(Self {
            config,
            chunker,
            store,
            embedder,
            llm,
            retriever,
            conversations: ConversationRegistry::new(),
        })
    }

    /// Wire up the pipeline with the providers named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let llm = create_language_model(&config.llm)?;
        Self::new(config.clone(), embedder, llm)
    }
}

/// Build the router over a shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = ctx.config.server.max_upload_bytes;

    Router::new()
        .route("/upload-and-build/", post(handle_upload))
        .route("/chat/", post(handle_chat))
        .route("/summarize/", post(handle_summarize))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(ctx)
}

/// Serve on an already-bound listener until the process is terminated.
pub async fn serve(ctx: Arc<AppContext>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

/// Starts the HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::from_config(config)?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("docchat server listening on http://{}", bind_addr);

    serve(ctx, listener).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"index_not_found"`).
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<DocChatError> for AppError {
    fn from(err: DocChatError) -> Self {
        let (status, code) = match &err {
            DocChatError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            DocChatError::EmptyDocument => (StatusCode::BAD_REQUEST, "empty_document"),
            DocChatError::IndexNotFound(_) => (StatusCode::BAD_REQUEST, "index_not_found"),
            DocChatError::UnknownConversation(_) => (StatusCode::BAD_REQUEST, "unknown_conversation"),
            DocChatError::InvalidChunking(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            DocChatError::EmbeddingMismatch { .. } => (StatusCode::CONFLICT, "embedding_mismatch"),
            DocChatError::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider_error"),
            DocChatError::Storage(_) | DocChatError::Io(_) => {
                error!(error = %err, "internal error");
                return AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal error".to_string(),
                };
            }
        };
        if status == StatusCode::BAD_GATEWAY {
            warn!(error = %err, "provider failure");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        bad_request(format!("invalid multipart body: {}", err.body_text()))
    }
}

/// Run CPU-bound document parsing on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!(error = %e, "document parsing task failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: "internal error".to_string(),
        }
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Multipart ============

struct UploadForm {
    filename: String,
    bytes: Vec<u8>,
    language: Option<String>,
}

/// Read the `file` part (and optional `language` field) into memory.
async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut file = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| bad_request("file part has no filename"))?;
                let bytes = field.bytes().await?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("language") => language = Some(field.text().await?),
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing multipart field: file"))?;
    Ok(UploadForm {
        filename,
        bytes,
        language,
    })
}

// ============ POST /upload-and-build/ ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    conversation_id: String,
    chunk_count: usize,
    index_version: String,
}

async fn handle_upload(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_upload(multipart).await?;

    let chunker = ctx.chunker;
    let plan = run_blocking(move || plan_document(&form.filename, &form.bytes, &chunker)).await??;
    let report = publish_plan(plan, &ctx.store, ctx.embedder.as_ref()).await?;

    let conversation_id = ctx.conversations.open(&report.index_version).await;

    Ok(Json(UploadResponse {
        message: format!(
            "Successfully processed {} chunks and built the vector DB.",
            report.chunk_count
        ),
        conversation_id,
        chunk_count: report.chunk_count,
        index_version: report.index_version,
    }))
}

// ============ POST /chat/ ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    conversation_id: Option<String>,
    query: String,
}

#[derive(Serialize)]
struct ChatResponse {
    conversation_id: String,
    answer: String,
    outcome: AnswerOutcome,
    chat_history: ConversationLog,
}

async fn handle_chat(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;

    let conversation_id = request
        .conversation_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| bad_request("missing conversation_id; upload a document first"))?;
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let conversation = ctx.conversations.get(&conversation_id).await?;
    // Held until both turns are recorded.
    let mut conversation = conversation.lock().await;

    let answer = ctx.retriever.answer(&request.query).await?;

    conversation
        .log
        .append_user(request.query)
        .append_assistant(answer.text.clone());

    Ok(Json(ChatResponse {
        conversation_id,
        answer: answer.text,
        outcome: answer.outcome,
        chat_history: conversation.log.clone(),
    }))
}

// ============ POST /summarize/ ============

#[derive(Serialize)]
struct SummaryResponse {
    summary: LegalDocSummary,
    is_summarized: bool,
}

async fn handle_summarize(
    State(ctx): State<Arc<AppContext>>,
    multipart: Multipart,
) -> Result<Json<SummaryResponse>, AppError> {
    let form = read_upload(multipart).await?;
    let language = form
        .language
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| bad_request("missing multipart field: language"))?;

    let format = DocumentFormat::from_filename(&form.filename)?;
    let bytes = form.bytes;
    let text = run_blocking(move || extract_text(format, &bytes)).await?;
    if text.trim().is_empty() {
        return Err(DocChatError::EmptyDocument.into());
    }

    let summary = summarize_document(ctx.llm.as_ref(), &text, &language).await;

    Ok(Json(SummaryResponse {
        summary,
        is_summarized: false,
    }))
}
