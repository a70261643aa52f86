//! Object identifiers and validation modes shared across crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::endpoint::encode_segment;

/// Identifies a remote object: bucket name plus object name.
///
/// The object name is opaque and may contain `/`. The handle is immutable once
/// constructed; use [`ObjectHandle::key`] for the canonical string form used as
/// the session store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectHandle {
    bucket: String,
    name: String,
}

impl ObjectHandle {
    /// Create a new handle.
    ///
    /// # Errors
    /// Returns an error if either the bucket or the object name is empty.
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Result<Self, CoreError> {
        let bucket = bucket.into();
        let name = name.into();
        if bucket.is_empty() {
            return Err(CoreError::InvalidObjectHandle(
                "bucket name must not be empty".to_owned(),
            ));
        }
        if name.is_empty() {
            return Err(CoreError::InvalidObjectHandle(format!(
                "object name in bucket {bucket} must not be empty"
            )));
        }
        Ok(Self { bucket, name })
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object name, unencoded.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical string form, `"{bucket}/{name}"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }

    /// The object name percent-encoded as a single path segment.
    #[must_use]
    pub fn encoded_name(&self) -> String {
        encode_segment(&self.name)
    }

    /// The bucket name percent-encoded as a single path segment.
    #[must_use]
    pub fn encoded_bucket(&self) -> String {
        encode_segment(&self.bucket)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.name)
    }
}

/// Checksum algorithm used to confirm end-to-end integrity after a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Validation skipped.
    None,
    /// MD5 digest, compared against the server's `md5Hash`.
    #[default]
    Md5,
    /// CRC-32C (Castagnoli), compared against the server's `crc32c`.
    Crc32c,
}

impl ValidationMode {
    /// Return the canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Md5 => "md5",
            Self::Crc32c => "crc32c",
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "false" => Ok(Self::None),
            "md5" => Ok(Self::Md5),
            "crc32c" => Ok(Self::Crc32c),
            _ => Err(CoreError::UnknownValidationMode(s.to_owned())),
        }
    }
}
