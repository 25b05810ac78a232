//! PDF rasterization via PDFium.

use pdfium_render::prelude::*;
use tracing::debug;

use super::{Page, PageRasterizer};
use crate::error::OcrError;

/// Renders every page of a PDF to an image with PDFium
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    pub fn new() -> Self {
        Self
    }
}

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
fn create_pdfium() -> Result<Pdfium, OcrError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| OcrError::Rasterize {
            message: format!("Failed to load PDFium library: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Page>, OcrError> {
        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| OcrError::Rasterize {
                message: format!("Failed to load PDF: {}", e),
            })?;

        let pixels_per_point = dpi as f32 / 72.0;
        let mut pages = Vec::new();

        for (i, page) in document.pages().iter().enumerate() {
            let index = i as u32 + 1;
            let width = (page.width().value * pixels_per_point).ceil() as i32;
            let height = (page.height().value * pixels_per_point).ceil() as i32;

            let config = PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height);

            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| OcrError::Rasterize {
                    message: format!("Failed to render page {}: {}", index, e),
                })?;

            debug!(page = index, width, height, dpi, "Rendered page");
            pages.push(Page {
                index,
                image: bitmap.as_image(),
            });
        }

        Ok(pages)
    }
}
