//! Typed errors for the export library.
//!
//! Orchestration code (`pipeline`, `main`) wraps these in `eyre` reports with
//! context. Per-message and per-attachment problems never surface here: they
//! are logged and skipped where they happen.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// A transcript did not begin with a `[date time] sender:` header line.
    #[error("transcript does not start with a message header: {line:?}")]
    StructuralParse { line: String },

    /// A message payload was not a JSON object of the expected shape.
    #[error("malformed message payload: {reason}")]
    MalformedPayload { reason: String },

    /// The store's `config.json` is missing or carries no `key`.
    #[error("decryption key not found in {}", path.display())]
    MissingKey { path: PathBuf },

    /// Output directory exists and overwriting was not requested.
    #[error("output folder {} already exists (use --overwrite to replace it)", path.display())]
    DestinationExists { path: PathBuf },

    #[error("classifier failed: {0}")]
    Classifier(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
