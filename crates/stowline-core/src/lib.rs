//! Core types, configuration, and endpoint construction for Stowline.
//!
//! This crate provides the building blocks shared by the transfer engine, the
//! HTTP transport, and the storage emulator: object handles, upload options,
//! the server's object resource, environment-driven configuration, and the
//! URL builders for every request the engine generates.

mod config;
pub mod endpoint;
mod error;
mod metadata;
mod options;
mod types;

pub use config::{TransferConfig, parse_bool};
pub use endpoint::{Endpoints, UploadType};
pub use error::{CoreError, CoreResult};
pub use metadata::ObjectMetadata;
pub use options::{DEFAULT_CONTENT_TYPE, TransferOptions, UploadStrategy};
pub use types::{ObjectHandle, ValidationMode};
