use sqlx::SqlitePool;

use crate::error::Result;

/// Create the index schema in a new index file.
///
/// `index_meta` holds exactly one row describing the snapshot; `records`
/// keeps chunks in insertion order (`position`) with their vectors stored as
/// little-endian f32 BLOBs.
pub async fn create_index_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            built_at INTEGER NOT NULL,
            record_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            position INTEGER PRIMARY KEY,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source ON records(source, chunk_index)")
        .execute(pool)
        .await?;

    Ok(())
}
