//! Reference chunk storage and embedding search.
//!
//! The collection is replaced wholesale on every ingestion batch: the delete
//! and the inserts run under separate lock acquisitions, so a concurrent
//! reader may observe an empty collection in between but never a mix of two
//! generations.

use chrono::Utc;
use rusqlite::params;

use super::Database;
use super::models::ReferenceChunk;
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Remove every reference chunk, returning how many were deleted
    pub fn clear_reference_chunks(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM reference_chunks", [])
            .map_err(DatabaseError::Query)?;
        Ok(deleted)
    }

    /// Insert a batch of chunks in one transaction
    pub fn insert_reference_chunks(&self, chunks: &[ReferenceChunk]) -> ServiceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO reference_chunks (id, source_link, chunk_index, content, embedding, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .map_err(DatabaseError::Query)?;

            for chunk in chunks {
                // Convert f32 slice to bytes
                let embedding_bytes: Vec<u8> =
                    chunk.embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
                stmt.execute(params![
                    chunk.id,
                    chunk.source_link,
                    chunk.chunk_index,
                    chunk.text,
                    embedding_bytes,
                    chunk.created_at.to_rfc3339(),
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// Whether the collection holds any chunk at all
    pub fn has_reference_chunks(&self) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM reference_chunks)",
                [],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(exists)
    }

    /// Source links currently present in the collection, in ingestion order
    pub fn reference_links(&self) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT source_link FROM reference_chunks \
                 GROUP BY source_link ORDER BY MIN(rowid)",
            )
            .map_err(DatabaseError::Query)?;

        let links = stmt
            .query_map([], |row| row.get(0))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(DatabaseError::Query)?;
        Ok(links)
    }

    /// Search reference chunks by embedding similarity (brute force)
    pub fn search_reference_chunks(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> ServiceResult<Vec<(ReferenceChunk, f32)>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, source_link, chunk_index, content, embedding, created_at
                FROM reference_chunks
                "#,
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map([], |row| {
                let embedding_bytes: Vec<u8> = row.get(4)?;
                let created_at_str: String = row.get(5)?;
                Ok(ReferenceChunk {
                    id: row.get(0)?,
                    source_link: row.get(1)?,
                    chunk_index: row.get(2)?,
                    text: row.get(3)?,
                    // Convert bytes back to f32 slice
                    embedding: embedding_bytes
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect(),
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(DatabaseError::Query)?;

        let mut results: Vec<(ReferenceChunk, f32)> = Vec::new();
        for row in rows {
            let chunk = row.map_err(DatabaseError::Query)?;
            let similarity = cosine_similarity(query_embedding, &chunk.embedding);
            results.push((chunk, similarity));
        }

        // Sort by similarity (descending)
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
