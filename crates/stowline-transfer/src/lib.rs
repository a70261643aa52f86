//! Resumable and simple object transfers for Stowline.
//!
//! The engine uploads and downloads objects through the JSON API of an object
//! store, validating every transfer end to end with CRC32C or MD5. Resumable
//! uploads survive process restarts: the session URI is persisted in a
//! [`SessionStore`] and the next attempt picks up from the offset the server
//! confirms.
//!
//! # Architecture
//!
//! ```text
//!  UploadStream ──chunks──> TransferSession ──┐
//!       ^                   (Phase::advance)  │
//!  UploadCoordinator              │           v
//!                           SessionStore   AuthorizedRequestFactory ──> server
//!  DownloadCoordinator ──> DownloadStream ────^
//! ```

pub mod checksums;
pub mod download;
pub mod error;
mod input;
pub mod request;
pub mod session;
pub mod session_store;
pub mod upload;

#[cfg(test)]
mod testing;

pub use checksums::StreamingValidator;
pub use download::{DownloadCoordinator, DownloadStream};
pub use error::{ExchangeError, TransferError, TransferResult};
pub use request::{AuthorizedRequestFactory, ByteStream, RequestBody, RequestError, ResponseBody};
pub use session::{Phase, SessionEvent};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore, SessionStoreError};
pub use upload::{UploadCoordinator, UploadStream};
