//! In-memory object store emulator for Stowline.
//!
//! Speaks the subset of the JSON API the transfer engine uses: resumable
//! sessions, media and multipart uploads, metadata and media reads, and
//! deletes. Digests are computed server-side. [`Faults`] switches let tests
//! force checksum mismatches and failing deletes or metadata reads, and every
//! request is logged for assertions.
//!
//! ```text
//! TcpListener -> serve() -> EmulatorService (routing) -> EmulatorState (DashMap)
//! ```

mod config;
pub mod error;
mod multipart;
pub mod server;
pub mod service;
pub mod state;

pub use config::EmulatorConfig;
pub use error::EmulatorError;
pub use server::{EmulatorHandle, serve};
pub use service::EmulatorService;
pub use state::{EmulatorState, Faults, LoggedRequest, StoredObject, UploadSession};
