//! Persistent vector index.
//!
//! An index is a single SQLite file holding one snapshot: a metadata row
//! (version, embedding model, dimensionality) and the embedded chunks in
//! insertion order. Snapshots are immutable once published:
//!
//! 1. [`IndexStore::build`] writes a complete new file next to the target
//!    (`<name>.building-<uuid>`),
//! 2. closes it, and
//! 3. renames it over the published path.
//!
//! A reader therefore always opens either the old or the new snapshot, never
//! a half-written one. A failed build removes its staging file and leaves the
//! published index untouched. Builds are serialized per store.
//!
//! Search is exact: cosine similarity against every record, ordered by score
//! descending with ties broken by insertion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BuildMode;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_batched, embed_query, vec_to_blob, EmbeddingProvider};
use crate::error::{DocChatError, Result};
use crate::migrate;
use crate::models::{Chunk, ScoredChunk};

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Snapshot metadata stored alongside the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Unique per build; changes whenever a new snapshot is published.
    pub version: String,
    pub model: String,
    pub dims: usize,
    /// Unix timestamp (seconds) of the build.
    pub built_at: i64,
    pub record_count: usize,
}

/// An immutable, fully loaded index snapshot.
#[derive(Debug)]
pub struct VectorIndex {
    meta: IndexMeta,
    records: Vec<EmbeddingRecord>,
}

impl VectorIndex {
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn version(&self) -> &str {
        &self.meta.version
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Fail with [`DocChatError::EmbeddingMismatch`] unless the index was
    /// built with `model` at `dims` dimensions.
    pub fn check_compatible(&self, model: &str, dims: usize) -> Result<()> {
        if self.meta.model != model || self.meta.dims != dims {
            return Err(DocChatError::EmbeddingMismatch {
                index_model: self.meta.model.clone(),
                index_dims: self.meta.dims,
                query_model: model.to_string(),
                query_dims: dims,
            });
        }
        Ok(())
    }

    /// Return the `k` records most similar to `query`.
    ///
    /// Returns `min(k, len)` results; `k == 0` yields none.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.meta.dims {
            return Err(DocChatError::EmbeddingMismatch {
                index_model: self.meta.model.clone(),
                index_dims: self.meta.dims,
                query_model: self.meta.model.clone(),
                query_dims: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (position, cosine_similarity(query, &record.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.records[position].chunk.clone(),
                score,
            })
            .collect())
    }
}

/// Owns the published index file and the in-memory snapshot cache.
pub struct IndexStore {
    path: PathBuf,
    mode: BuildMode,
    batch_size: usize,
    current: RwLock<Option<Arc<VectorIndex>>>,
    build_lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>, mode: BuildMode) -> Self {
        Self {
            path: path.into(),
            mode,
            batch_size: DEFAULT_BATCH_SIZE,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Texts per embedding request during [`build`](Self::build).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Embed `chunks` and publish them as a new snapshot.
    pub async fn build(
        &self,
        embedder: &dyn EmbeddingProvider,
        chunks: Vec<Chunk>,
    ) -> Result<Arc<VectorIndex>> {
        if chunks.is_empty() {
            return Err(DocChatError::EmptyDocument);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(embedder, &texts, self.batch_size).await?;
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord { chunk, vector })
            .collect();

        self.publish_records(records, embedder.model_name(), embedder.dims())
            .await
    }

    /// Publish already-embedded `records` as a new snapshot.
    ///
    /// With [`BuildMode::Accumulate`] the records of the currently published
    /// index (if any) are kept ahead of the new ones; its embedding model must
    /// match.
    pub async fn publish_records(
        &self,
        records: Vec<EmbeddingRecord>,
        model: &str,
        dims: usize,
    ) -> Result<Arc<VectorIndex>> {
        let _guard = self.build_lock.lock().await;

        if records.is_empty() {
            return Err(DocChatError::EmptyDocument);
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dims) {
            return Err(DocChatError::EmbeddingMismatch {
                index_model: model.to_string(),
                index_dims: dims,
                query_model: model.to_string(),
                query_dims: bad.vector.len(),
            });
        }

        let mut all = Vec::new();
        if self.mode == BuildMode::Accumulate && self.exists() {
            let previous = self.load_snapshot().await?;
            previous.check_compatible(model, dims)?;
            all.extend(previous.records().iter().cloned());
        }
        all.extend(records);

        let meta = IndexMeta {
            version: Uuid::new_v4().to_string(),
            model: model.to_string(),
            dims,
            built_at: chrono::Utc::now().timestamp(),
            record_count: all.len(),
        };

        let staging = self.staging_path();
        if let Err(e) = self.publish(&staging, &meta, &all).await {
            if staging.exists() {
                if let Err(rm) = std::fs::remove_file(&staging) {
                    warn!(path = %staging.display(), error = %rm, "failed to remove staging index");
                }
            }
            return Err(e);
        }

        info!(
            path = %self.path.display(),
            version = %meta.version,
            records = meta.record_count,
            model = %meta.model,
            "published index"
        );

        let index = Arc::new(VectorIndex { meta, records: all });
        *self.current.write().await = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Load the published snapshot and check it was built with `embedder`'s
    /// model and dimensionality.
    pub async fn load(&self, embedder: &dyn EmbeddingProvider) -> Result<Arc<VectorIndex>> {
        let index = self.load_snapshot().await?;
        index.check_compatible(embedder.model_name(), embedder.dims())?;
        Ok(index)
    }

    /// Rank the published records against `query`.
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let index = self.load(embedder).await?;
        let vector = embed_query(embedder, query).await?;
        index.search_vector(&vector, top_k)
    }

    /// Load the published snapshot without a model check.
    ///
    /// Returns the cached snapshot when the file on disk still carries the
    /// same version, so repeated queries do not re-read the records.
    pub async fn load_snapshot(&self) -> Result<Arc<VectorIndex>> {
        if !self.exists() {
            return Err(DocChatError::IndexNotFound(self.path.clone()));
        }

        let pool = db::open_read_only(&self.path).await?;
        let result = match pool.acquire().await {
            // Meta and records must come from the same open file.
            Ok(mut conn) => self.load_from(&mut conn).await,
            Err(e) => Err(e.into()),
        };
        pool.close().await;
        result
    }

    async fn load_from(&self, conn: &mut SqliteConnection) -> Result<Arc<VectorIndex>> {
        let meta = read_meta(&mut *conn).await?;

        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.meta.version == meta.version {
                return Ok(Arc::clone(cached));
            }
        }

        let rows = sqlx::query(
            "SELECT source, chunk_index, start_offset, text, hash, vector FROM records ORDER BY position",
        )
        .fetch_all(&mut *conn)
        .await?;

        let records: Vec<EmbeddingRecord> = rows
            .iter()
            .map(|row| {
                let start: i64 = row.get("start_offset");
                let blob: Vec<u8> = row.get("vector");
                EmbeddingRecord {
                    chunk: Chunk {
                        source: row.get("source"),
                        chunk_index: row.get("chunk_index"),
                        start: start as usize,
                        text: row.get("text"),
                        hash: row.get("hash"),
                    },
                    vector: blob_to_vec(&blob),
                }
            })
            .collect();

        debug!(version = %meta.version, records = records.len(), "loaded index snapshot");

        let index = Arc::new(VectorIndex { meta, records });
        *self.current.write().await = Some(Arc::clone(&index));
        Ok(index)
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        self.path
            .with_file_name(format!("{}.building-{}", name, Uuid::new_v4()))
    }

    async fn publish(&self, staging: &Path, meta: &IndexMeta, records: &[EmbeddingRecord]) -> Result<()> {
        let pool = db::create(staging).await?;
        let written = write_snapshot(&pool, meta, records).await;
        pool.close().await;
        written?;

        std::fs::rename(staging, &self.path)?;
        Ok(())
    }
}

async fn write_snapshot(pool: &SqlitePool, meta: &IndexMeta, records: &[EmbeddingRecord]) -> Result<()> {
    migrate::create_index_schema(pool).await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO index_meta (id, version, model, dims, built_at, record_count) VALUES (1, ?, ?, ?, ?, ?)",
    )
    .bind(&meta.version)
    .bind(&meta.model)
    .bind(meta.dims as i64)
    .bind(meta.built_at)
    .bind(meta.record_count as i64)
    .execute(&mut *tx)
    .await?;

    for (position, record) in records.iter().enumerate() {
        sqlx::query(
            "INSERT INTO records (position, source, chunk_index, start_offset, text, hash, vector) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(position as i64)
        .bind(&record.chunk.source)
        .bind(record.chunk.chunk_index)
        .bind(record.chunk.start as i64)
        .bind(&record.chunk.text)
        .bind(&record.chunk.hash)
        .bind(vec_to_blob(&record.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn read_meta(conn: &mut SqliteConnection) -> Result<IndexMeta> {
    let row = sqlx::query(
        "SELECT version, model, dims, built_at, record_count FROM index_meta WHERE id = 1",
    )
    .fetch_one(conn)
    .await?;

    let dims: i64 = row.get("dims");
    let record_count: i64 = row.get("record_count");
    Ok(IndexMeta {
        version: row.get("version"),
        model: row.get("model"),
        dims: dims as usize,
        built_at: row.get("built_at"),
        record_count: record_count as usize,
    })
}
