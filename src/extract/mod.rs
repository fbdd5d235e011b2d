//! Per-page text retrieval with OCR fallback.
//!
//! Each page first tries the PDF's embedded text layer. Pages whose layer is
//! blank after trimming are rasterised and sent through OCR, when an OCR
//! backend is configured. Both stages sit behind traits so the branching in
//! [`DocumentExtractor::extract_page_text`] can be exercised with mocks.

pub mod ocr;
pub mod pdf;
#[cfg(feature = "ocr")]
pub mod render;

pub use ocr::OcrEngine;
pub use pdf::PdfTextLayer;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR processing failed on page {page}: {reason}")]
    OcrProcessing { page: usize, reason: String },

    #[error("image encoding failed: {0}")]
    ImageProcessing(String),
}

/// Native text layer of a PDF, one string per page in page order.
pub trait TextLayer: Send + Sync {
    fn page_texts(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// Renders a single page (0-based) to PNG bytes.
pub trait PageRasterizer: Send + Sync {
    fn render_page(&self, pdf_bytes: &[u8], page_index: usize, dpi: u32)
        -> Result<Vec<u8>, ExtractionError>;
}

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageSource {
    TextLayer,
    Ocr,
    /// Blank text layer and no OCR backend available.
    Empty,
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
    pub source: PageSource,
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub pages: Vec<PageText>,
}

impl ExtractedText {
    /// Page texts joined with newlines, in page order.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn ocr_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.source == PageSource::Ocr).count()
    }
}

struct OcrBackend {
    rasterizer: Box<dyn PageRasterizer>,
    engine: Box<dyn OcrEngine>,
}

/// Text extractor with an optional OCR fallback stage.
pub struct DocumentExtractor {
    text_layer: Box<dyn TextLayer>,
    ocr: Option<OcrBackend>,
    language: String,
    dpi: u32,
}

impl DocumentExtractor {
    pub fn new(text_layer: Box<dyn TextLayer>) -> Self {
        DocumentExtractor {
            text_layer,
            ocr: None,
            language: "por".to_string(),
            dpi: 200,
        }
    }

    pub fn with_ocr(
        mut self,
        rasterizer: Box<dyn PageRasterizer>,
        engine: Box<dyn OcrEngine>,
    ) -> Self {
        self.ocr = Some(OcrBackend { rasterizer, engine });
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }

    /// Text of every page, in page order.
    pub fn extract_text(&self, pdf_bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let native = self.text_layer.page_texts(pdf_bytes)?;
        let pages = native
            .iter()
            .enumerate()
            .map(|(idx, text)| self.extract_page_text(pdf_bytes, idx, text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExtractedText { pages })
    }

    /// Use the native layer when it has content, otherwise rasterise and OCR.
    pub fn extract_page_text(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        native: &str,
    ) -> Result<PageText, ExtractionError> {
        let page_number = page_index + 1;
        if !native.trim().is_empty() {
            return Ok(PageText {
                page_number,
                text: native.to_string(),
                source: PageSource::TextLayer,
            });
        }

        let Some(backend) = &self.ocr else {
            warn!(page = page_number, "Blank text layer and OCR is unavailable");
            return Ok(PageText {
                page_number,
                text: String::new(),
                source: PageSource::Empty,
            });
        };

        let png = backend.rasterizer.render_page(pdf_bytes, page_index, self.dpi)?;
        let text = backend
            .engine
            .recognize(&png, &self.language)
            .map_err(|e| match e {
                ExtractionError::OcrProcessing { reason, .. } => ExtractionError::OcrProcessing {
                    page: page_number,
                    reason,
                },
                other => other,
            })?;
        debug!(page = page_number, chars = text.len(), "OCR fallback used");

        Ok(PageText {
            page_number,
            text,
            source: PageSource::Ocr,
        })
    }
}
