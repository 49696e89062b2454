//! Error types for ChainDB
//!
//! Two layers: [`Error`] is what the LSM engine reports, [`StoreError`] is
//! what the adaptation layer hands to callers of the key-value contract.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// LSM engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid or incompatible on-disk format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Key is not present in the database
    #[error("not found")]
    NotFound,

    /// Database directory is held by another live handle
    #[error("Database is locked: {}", .0.display())]
    Locked(PathBuf),

    /// Handle has been closed
    #[error("Database is closed")]
    Closed,

    /// Compaction error
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// WAL recovery error
    #[error("WAL recovery error: {0}")]
    WalRecovery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if error is the engine's absence signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// Open file descriptor limit negotiation failures
#[derive(Error, Debug)]
pub enum ResourceLimitError {
    #[error("failed to read open file limit: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to raise open file limit: {0}")]
    Raise(#[source] std::io::Error),

    #[error("open file limit negotiation is not supported on this platform")]
    Unsupported,
}

/// Errors surfaced by the storage adaptation layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Requested file descriptor tuning could not be applied
    #[error(transparent)]
    ResourceLimit(#[from] ResourceLimitError),

    /// Path locked, not writable, or incompatible on-disk format
    #[error("failed to open database at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Error,
    },

    /// I/O or corruption while reading
    #[error("database read failed: {0}")]
    Read(#[source] Error),

    /// I/O or corruption while writing
    #[error("database write failed: {0}")]
    Write(#[source] Error),

    /// Statistics snapshot unavailable
    #[error("database stats unavailable: {0}")]
    Stats(#[source] Error),

    /// Close failed, including a second close of the same handle
    #[error("database close failed: {0}")]
    Close(#[source] Error),
}

impl StoreError {
    /// The engine error underneath, if any
    pub fn engine_error(&self) -> Option<&Error> {
        match self {
            StoreError::ResourceLimit(_) => None,
            StoreError::Open { source, .. } => Some(source),
            StoreError::Read(e)
            | StoreError::Write(e)
            | StoreError::Stats(e)
            | StoreError::Close(e) => Some(e),
        }
    }

    /// Check if the failure came from using a closed handle
    pub fn is_closed(&self) -> bool {
        matches!(self.engine_error(), Some(Error::Closed))
    }
}
