//! Turning PDF bytes into page-indexed text.
//!
//! Rasterization and recognition are collaborators behind the
//! [`PageRasterizer`] and [`OcrEngine`] traits; [`ParallelOcrExecutor`] fans
//! pages out to a fixed pool of workers and restores page order afterwards.

mod executor;
mod pdfium;
mod tesseract;

pub use executor::{FailurePolicy, PageFailure, ParallelOcrExecutor};
pub use pdfium::PdfiumRasterizer;
pub use tesseract::TesseractEngine;

use image::DynamicImage;
use serde::Serialize;

use crate::error::OcrError;

/// One rendered page; `index` is 1-based and unique within a document
pub struct Page {
    pub index: u32,
    pub image: DynamicImage,
}

/// Recognized text of a single page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    pub index: u32,
    pub text: String,
}

/// Page texts ordered strictly by page index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pages: Vec<PageText>,
}

impl Document {
    /// Build a document from results in arbitrary arrival order.
    ///
    /// This is the single place ordering is established; duplicate indices
    /// keep their first occurrence.
    pub fn from_unordered(mut pages: Vec<PageText>) -> Self {
        pages.sort_by_key(|p| p.index);
        pages.dedup_by_key(|p| p.index);
        Self { pages }
    }

    pub fn pages(&self) -> &[PageText] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// `{"page_<n>": text}` as returned by the extraction endpoints
    pub fn to_page_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.pages
            .iter()
            .map(|p| {
                (
                    format!("page_{}", p.index),
                    serde_json::Value::String(p.text.clone()),
                )
            })
            .collect()
    }
}

/// Renders PDF bytes into page images in document order
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Page>, OcrError>;
}

/// Recognizes the text on one page image.
///
/// Implementations must be stateless between calls so pages can be
/// processed concurrently and retried safely.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, page: &Page) -> Result<String, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(index: u32, text: &str) -> PageText {
        PageText {
            index,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_from_unordered_sorts_and_dedups() {
        let doc = Document::from_unordered(vec![
            text(3, "Gamma"),
            text(1, "Alpha"),
            text(3, "dup"),
            text(2, "Beta"),
        ]);
        let indices: Vec<u32> = doc.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(doc.pages()[2].text, "Gamma");
    }

    #[test]
    fn test_page_map_keys() {
        let doc = Document::from_unordered(vec![text(2, "Beta"), text(1, "Alpha")]);
        let map = doc.to_page_map();
        assert_eq!(map["page_1"], "Alpha");
        assert_eq!(map["page_2"], "Beta");
        assert_eq!(map.len(), 2);
    }
}
