//! Rule-based mining of radiology report PDFs.
//!
//! Documents go through text extraction (with OCR fallback), header parsing
//! and sentence-level finding detection; findings are merged into a
//! per-domain [`aggregate::Session`] and can be correlated against a roster.

pub mod aggregate;
pub mod config;
pub mod correlate;
pub mod detect;
pub mod error;
pub mod export;
pub mod extract;
pub mod header;
pub mod ingest;
pub mod measure;
pub mod pipeline;

pub use error::{MineError, Result};
