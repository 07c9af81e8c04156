use anyhow::Result;
use sqlx::SqlitePool;

/// Create the tracker schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_documents (
            path TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            last_processed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracker_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracked_documents_id ON tracked_documents(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
