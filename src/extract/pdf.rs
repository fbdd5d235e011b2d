use std::panic;

use super::{ExtractionError, TextLayer};

/// Embedded text layer via the pdf-extract crate.
pub struct PdfTextLayer;

impl TextLayer for PdfTextLayer {
    fn page_texts(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed font/encoding tables
        let result = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(pdf_bytes));
        match result {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ExtractionError::PdfParsing(e.to_string())),
            Err(_) => Err(ExtractionError::PdfParsing(
                "text extraction aborted on malformed content".into(),
            )),
        }
    }
}
