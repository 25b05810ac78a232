//! Append-only storage for OCR'd page text.

use rusqlite::params;

use super::Database;
use super::models::CorpusPage;
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Append pages of one document in a single transaction
    pub fn append_corpus_pages(&self, document_id: &str, pages: &[(u32, String)]) -> ServiceResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO corpus_pages (document_id, page_index, text, created_at) \
                     VALUES (?1, ?2, ?3, datetime('now'))",
                )
                .map_err(DatabaseError::Query)?;
            for (index, text) in pages {
                stmt.execute(params![document_id, index, text])
                    .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// All pages in insertion order, optionally restricted to one document
    pub fn list_corpus_pages(&self, document_id: Option<&str>) -> ServiceResult<Vec<CorpusPage>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT document_id, page_index, text
                FROM corpus_pages
                WHERE ?1 IS NULL OR document_id = ?1
                ORDER BY seq
                "#,
            )
            .map_err(DatabaseError::Query)?;

        let pages = stmt
            .query_map(params![document_id], |row| {
                Ok(CorpusPage {
                    document_id: row.get(0)?,
                    page_index: row.get(1)?,
                    text: row.get(2)?,
                })
            })
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(pages)
    }

    /// Number of stored pages
    pub fn corpus_page_count(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM corpus_pages", [], |row| row.get(0))
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::temp_db;

    #[test]
    fn test_pages_come_back_in_append_order() {
        let (_dir, db) = temp_db();
        db.append_corpus_pages("a.pdf", &[(1, "one".into()), (2, "two".into())])
            .unwrap();
        db.append_corpus_pages("b.pdf", &[(1, "other".into())]).unwrap();
        db.append_corpus_pages("a.pdf", &[(1, "again".into())]).unwrap();

        let all = db.list_corpus_pages(None).unwrap();
        let texts: Vec<&str> = all.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "other", "again"]);

        let only_b = db.list_corpus_pages(Some("b.pdf")).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].page_index, 1);
        assert_eq!(db.corpus_page_count().unwrap(), 4);
    }
}
