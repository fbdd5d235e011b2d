use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractionError;

#[derive(Error, Debug)]
pub enum MineError {
    #[error("document {document} is unreadable: {reason}")]
    DocumentUnreadable { document: String, reason: String },

    #[error("document {document} timed out after {secs}s")]
    DocumentTimeout { document: String, secs: u64 },

    #[error("archive {path} could not be read: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("roster is missing column {column:?}")]
    RosterColumnMissing { column: String },

    #[error("session is bound to {expected}, cannot merge {found} findings")]
    DomainMismatch { expected: String, found: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MineError {
    /// Wrap an extraction failure as the per-document skip error.
    pub fn unreadable(document: &str, err: ExtractionError) -> Self {
        MineError::DocumentUnreadable {
            document: document.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T, E = MineError> = std::result::Result<T, E>;
