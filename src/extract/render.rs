//! Page rasterisation via PDFium, feeding the OCR fallback.
//!
//! `Pdfium` is `!Send`, so a fresh binding is created per call. The dynamic
//! library load is cached by the OS loader.

use std::io::Cursor;

use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::{ExtractionError, PageRasterizer};

/// Longest rendered edge in pixels.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Fails fast when the PDFium library cannot be found.
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// `PDFIUM_DYNAMIC_LIB_PATH` first, then the system library path.
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let lib = Pdfium::pdfium_platform_library_name_at_path(&path);
        let bindings = Pdfium::bind_to_library(&lib).map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDFium from {path}: {e}"),
        })?;
        return Ok(Pdfium::new(bindings));
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
        page: 0,
        reason: format!("PDFium library not found, set PDFIUM_DYNAMIC_LIB_PATH: {e}"),
    })?;
    Ok(Pdfium::new(bindings))
}

fn render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let w = (width_points * scale).max(1.0);
    let h = (height_points * scale).max(1.0);
    let longest = w.max(h);
    if longest > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / longest;
        if w >= h {
            (MAX_DIMENSION_PX, ((h * ratio) as u32).max(1))
        } else {
            (((w * ratio) as u32).max(1), MAX_DIMENSION_PX)
        }
    } else {
        (w as u32, h as u32)
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let page_number = page_index + 1;
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("Failed to load PDF: {e}"),
            })?;

        let index = u16::try_from(page_index).map_err(|_| ExtractionError::PdfRendering {
            page: page_number,
            reason: "page index exceeds u16".into(),
        })?;
        let pages = document.pages();
        let page = pages.get(index).map_err(|e| ExtractionError::PdfRendering {
            page: page_number,
            reason: format!("page out of range: {e}"),
        })?;

        let (w, h) = render_dimensions(page.width().value, page.height().value, dpi);
        if w == MAX_DIMENSION_PX || h == MAX_DIMENSION_PX {
            warn!(page = page_number, w, h, "Page render capped");
        }

        let config = PdfRenderConfig::new()
            .set_target_width(w as i32)
            .set_maximum_height(h as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| ExtractionError::PdfRendering {
                page: page_number,
                reason: e.to_string(),
            })?;

        let mut cursor = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
        let png = cursor.into_inner();
        debug!(page = page_number, w, h, bytes = png.len(), "Rendered page");
        Ok(png)
    }
}
