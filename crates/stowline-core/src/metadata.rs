//! The object resource reported by the server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object metadata as returned by the JSON API.
///
/// Only the fields the transfer engine reads are typed; every other field is
/// preserved in [`ObjectMetadata::extra`] so callers see the full resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Object size in bytes (the API encodes it as a decimal string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64-encoded MD5 digest of the object data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    /// Base64-encoded big-endian CRC-32C of the object data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32c: Option<String>,
    /// Direct download link for the object data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_link: Option<String>,
    /// Object generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    /// Custom metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Remaining fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObjectMetadata {
    /// Parse the decimal `size` field.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}
