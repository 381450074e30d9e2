//! Storage-layer error types

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the registry and checkpoint codec
#[derive(Debug, Error)]
pub enum StorageError {
    /// Checkpoint blob did not start with the expected magic bytes
    #[error("invalid checkpoint magic bytes")]
    BadMagic,

    /// Checkpoint format version is not supported by this build
    #[error("unsupported checkpoint format version: {0}")]
    UnsupportedVersion(u16),

    /// CRC32 checksum mismatch after decompression
    #[error("checkpoint checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// lz4 decompression failed
    #[error("lz4 decompression failed: {0}")]
    Decompress(String),

    /// bincode encode/decode failure
    #[error("codec error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),

    /// Truncated or otherwise malformed blob
    #[error("malformed checkpoint blob: {0}")]
    Malformed(String),

    /// Generic I/O error surfaced from a persistence collaborator
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
