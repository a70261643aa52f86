//! Error types for the Stowline core.

/// Core error type for Stowline shared types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Invalid object handle (empty bucket or object name).
    #[error("invalid object handle: {0}")]
    InvalidObjectHandle(String),

    /// Unknown validation mode string.
    #[error("unknown validation mode: {0} (expected none, md5 or crc32c)")]
    UnknownValidationMode(String),

    /// Unknown upload strategy string.
    #[error("unknown upload strategy: {0} (expected simple or resumable)")]
    UnknownUploadStrategy(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience result type for Stowline core operations.
pub type CoreResult<T> = Result<T, CoreError>;
