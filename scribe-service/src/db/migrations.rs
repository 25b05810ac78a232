//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Every statement is idempotent so this runs on each startup.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- OCR corpus: one row per recognized page, append-only
        CREATE TABLE IF NOT EXISTS corpus_pages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            page_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_corpus_pages_document ON corpus_pages(document_id);

        -- Reference collection for vector search
        -- Embeddings are stored as little-endian f32 BLOBs and searched brute force
        CREATE TABLE IF NOT EXISTS reference_chunks (
            id TEXT PRIMARY KEY,
            source_link TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_reference_chunks_link ON reference_chunks(source_link);

        -- Runtime setting overrides (JSON values)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Initial schema failed: {}", e),
    })?;

    Ok(())
}
