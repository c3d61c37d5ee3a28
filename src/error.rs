//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TsCastError>;

#[derive(Debug, Error)]
pub enum TsCastError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("insufficient data: requested {requested} periods, only {available} available")]
    InsufficientData { requested: usize, available: usize },
    #[error(
        "partial parse: expected {expected} values, recovered {recovered} ({skipped} tokens skipped)"
    )]
    PartialParse {
        expected: usize,
        recovered: usize,
        skipped: usize,
    },
    #[error("length mismatch: actual has {actual} values, predicted has {predicted}")]
    LengthMismatch { actual: usize, predicted: usize },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl TsCastError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
