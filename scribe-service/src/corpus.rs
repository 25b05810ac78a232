//! Append-only store of OCR'd page text, shared by ingestion and local search.

use std::sync::Arc;
use tracing::info;

use crate::db::{CorpusPage, Database};
use crate::error::ServiceResult;
use crate::ocr::Document;

/// Render the line that introduces page `index` in the corpus text
pub fn page_marker(index: u32) -> String {
    format!("--- Page {} ---", index)
}

/// Whether a line is a page-break marker
pub fn is_page_marker(line: &str) -> bool {
    line.trim()
        .strip_prefix("--- Page ")
        .and_then(|rest| rest.strip_suffix(" ---"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Process-wide corpus handle
pub struct Corpus {
    db: Arc<Database>,
}

impl Corpus {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append every page of `document` under `document_id`.
    ///
    /// Re-appending an identifier adds a new generation after the old one.
    pub fn append(&self, document_id: &str, document: &Document) -> ServiceResult<()> {
        let pages: Vec<(u32, String)> = document
            .pages()
            .iter()
            .map(|p| (p.index, p.text.clone()))
            .collect();
        self.db.append_corpus_pages(document_id, &pages)?;
        info!(document = %document_id, pages = pages.len(), "Appended document to corpus");
        Ok(())
    }

    /// The whole corpus as marker-delimited text
    pub fn text(&self) -> ServiceResult<String> {
        Ok(render(&self.db.list_corpus_pages(None)?))
    }

    pub fn page_count(&self) -> ServiceResult<usize> {
        self.db.corpus_page_count()
    }
}

/// A single document rendered the same way the corpus renders its pages
pub fn render_document(document: &Document) -> String {
    let mut out = String::new();
    for page in document.pages() {
        push_page(&mut out, page.index, &page.text);
    }
    out
}

fn render(pages: &[CorpusPage]) -> String {
    let mut out = String::new();
    for page in pages {
        push_page(&mut out, page.page_index, &page.text);
    }
    out
}

fn push_page(out: &mut String, index: u32, text: &str) {
    out.push_str(&page_marker(index));
    out.push('\n');
    out.push_str(text);
    out.push_str("\n\n");
}
