//! Upload options.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{CoreError, ValidationMode};

/// Content type declared when the caller does not provide one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload protocol strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStrategy {
    /// One request carrying metadata and the full payload.
    Simple,
    /// Negotiated session that can be resumed after interruption.
    Resumable,
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::Resumable => "resumable",
        })
    }
}

impl FromStr for UploadStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "resumable" => Ok(Self::Resumable),
            _ => Err(CoreError::UnknownUploadStrategy(s.to_owned())),
        }
    }
}

/// Configuration for a single upload.
///
/// # Examples
///
/// ```
/// use stowline_core::{TransferOptions, UploadStrategy, ValidationMode};
///
/// let options = TransferOptions::builder()
///     .validation(ValidationMode::Crc32c)
///     .content_type(Some("image/jpeg".to_owned()))
///     .build();
/// assert_eq!(options.resolve_strategy(1024), UploadStrategy::Resumable);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TransferOptions {
    /// Integrity check performed once the server reports final metadata.
    #[builder(default)]
    pub validation: ValidationMode,

    /// Explicit upload strategy. When unset, see [`TransferOptions::resolve_strategy`].
    #[builder(default)]
    pub strategy: Option<UploadStrategy>,

    /// Custom metadata sent to the server with the object.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,

    /// Declared content type.
    #[builder(default)]
    pub content_type: Option<String>,

    /// Total payload length, when known in advance.
    #[builder(default)]
    pub content_length: Option<u64>,
}

impl TransferOptions {
    /// The declared content type, or [`DEFAULT_CONTENT_TYPE`].
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Pick the upload strategy.
    ///
    /// An explicit strategy always wins. Otherwise the upload is resumable
    /// unless the payload length is known and does not exceed
    /// `simple_threshold`.
    #[must_use]
    pub fn resolve_strategy(&self, simple_threshold: u64) -> UploadStrategy {
        match (self.strategy, self.content_length) {
            (Some(strategy), _) => strategy,
            (None, Some(len)) if len <= simple_threshold => UploadStrategy::Simple,
            (None, _) => UploadStrategy::Resumable,
        }
    }
}
