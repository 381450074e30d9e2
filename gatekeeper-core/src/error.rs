//! Core error types.
//!
//! Per §7, no runtime error may bubble through the ingest hot path —
//! this type exists for the non-hot-path surfaces (checkpoint decode,
//! policy snapshot parsing) where a caller genuinely needs a `Result`.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] gatekeeper_storage::StorageError),

    #[error("codec error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),

    #[error("invalid policy snapshot: {0}")]
    InvalidPolicy(String),

    #[error("unknown detector id: {0}")]
    UnknownDetector(u8),
}
