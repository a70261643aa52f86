//! Transfer error types.
//!
//! [`ExchangeError`] describes one failed HTTP exchange. [`TransferError`] is
//! what callers see: it names the phase that failed and carries a stable
//! [`TransferError::code`] string.

use http::StatusCode;
use stowline_core::ValidationMode;

use crate::request::{RequestError, ResponseBody};
use crate::session_store::SessionStoreError;

/// Longest response body excerpt kept in an [`ExchangeError::Status`].
const MAX_ERROR_BODY: usize = 1024;

/// A single failed HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The request factory failed (authorization or transport).
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The server answered with an unexpected status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status {
        /// The status code received.
        status: StatusCode,
        /// Response body excerpt.
        body: String,
    },

    /// The response was missing a required part or could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A request body or response body stream failed.
    #[error("body stream failed: {0}")]
    Body(#[source] std::io::Error),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),
}

impl ExchangeError {
    /// Build a [`ExchangeError::Status`] from a response, reading an excerpt
    /// of its body.
    pub async fn from_response(response: http::Response<ResponseBody>) -> Self {
        let status = response.status();
        let body = match response.into_body().collect().await {
            Ok(bytes) => {
                let end = bytes.len().min(MAX_ERROR_BODY);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            Err(e) => format!("<unreadable body: {e}>"),
        };
        Self::Status { status, body }
    }

    /// The HTTP status, when the failure was a status error.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error surfaced to callers of the upload and download coordinators.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The upload session could not be negotiated. No resume state was persisted.
    #[error("failed to negotiate upload session for {object}: {source}")]
    Negotiation {
        /// The object being uploaded.
        object: String,
        /// The failed exchange.
        source: ExchangeError,
    },

    /// Network failure mid-transfer. A persisted session, if any, is kept so
    /// the next attempt resumes.
    #[error("transfer of {object} failed: {source}")]
    Transfer {
        /// The object being transferred.
        object: String,
        /// The failed exchange.
        source: ExchangeError,
    },

    /// The uploaded data failed validation and the remote object was deleted.
    #[error(
        "upload of {object} failed {mode} validation (local {local}, server {server}); the remote object was deleted and the data must be sent again"
    )]
    FileNoUpload {
        /// The object that was uploaded.
        object: String,
        /// The validation mode in effect.
        mode: ValidationMode,
        /// Locally computed digest.
        local: String,
        /// Server-reported digest.
        server: String,
    },

    /// The uploaded data failed validation and deleting the remote object
    /// also failed, so a corrupt object may still exist.
    #[error(
        "upload of {object} failed {mode} validation (local {local}, server {server}) and the corrupt remote object could not be deleted: {delete_error}"
    )]
    FileNoUploadDelete {
        /// The object that was uploaded.
        object: String,
        /// The validation mode in effect.
        mode: ValidationMode,
        /// Locally computed digest.
        local: String,
        /// Server-reported digest.
        server: String,
        /// Why the delete failed.
        #[source]
        delete_error: ExchangeError,
    },

    /// Downloaded bytes do not match the server-reported digest.
    #[error("downloaded content of {object} failed {mode} validation (local {local}, server {server})")]
    DownloadMismatch {
        /// The object that was downloaded.
        object: String,
        /// The validation mode in effect.
        mode: ValidationMode,
        /// Locally computed digest.
        local: String,
        /// Server-reported digest.
        server: String,
    },

    /// The object does not exist.
    #[error("object {object} not found: {source}")]
    NotFound {
        /// The requested object.
        object: String,
        /// The failed metadata exchange.
        source: ExchangeError,
    },

    /// The local session store failed.
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),

    /// The upload stream already reached a terminal state.
    #[error("upload stream is closed")]
    StreamClosed,

    /// The transfer task was cancelled before it finished.
    #[error("transfer of {object} was aborted")]
    Aborted {
        /// The object being transferred.
        object: String,
    },
}

impl TransferError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Negotiation { .. } => "NEGOTIATION_FAILED",
            Self::Transfer { .. } => "TRANSFER_FAILED",
            Self::FileNoUpload { .. } => "FILE_NO_UPLOAD",
            Self::FileNoUploadDelete { .. } => "FILE_NO_UPLOAD_DELETE",
            Self::DownloadMismatch { .. } => "CONTENT_DOWNLOAD_MISMATCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::SessionStore(_) => "SESSION_STORE",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::Aborted { .. } => "ABORTED",
        }
    }
}

/// Convenience result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;
