//! URL construction for every request the transfer engine generates.
//!
//! Bucket and object names are always percent-encoded as a single path
//! segment (or query value), so an object name such as `directory/file.jpg`
//! appears as `directory%2Ffile.jpg` on the wire.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::ObjectHandle;

/// Characters escaped in a path segment or query value: everything outside
/// the RFC 3986 unreserved set.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode `value` as a single URL path segment.
#[must_use]
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Upload protocol selected on the upload endpoint (`uploadType=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    /// Resumable session initiation.
    Resumable,
    /// Single request carrying only the payload.
    Media,
    /// Single `multipart/related` request carrying metadata and payload.
    Multipart,
}

impl UploadType {
    /// Query parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resumable => "resumable",
            Self::Media => "media",
            Self::Multipart => "multipart",
        }
    }
}

/// Endpoint roots for the JSON API.
///
/// # Examples
///
/// ```
/// use stowline_core::{Endpoints, ObjectHandle};
///
/// let endpoints = Endpoints::new("http://localhost:4443/");
/// let handle = ObjectHandle::new("bucket", "a/b.txt").unwrap();
/// assert_eq!(
///     endpoints.object_url(&handle),
///     "http://localhost:4443/storage/v1/b/bucket/o/a%2Fb.txt"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// Create endpoints rooted at `base` (scheme and authority, optional
    /// trailing slash).
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_owned();
        Self { base }
    }

    /// The normalized base URL.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Upload endpoint for `handle` with the given upload type.
    #[must_use]
    pub fn upload_url(&self, handle: &ObjectHandle, upload_type: UploadType) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType={}&name={}",
            self.base,
            handle.encoded_bucket(),
            upload_type.as_str(),
            handle.encoded_name(),
        )
    }

    /// Object resource URL used for metadata fetch and delete.
    #[must_use]
    pub fn object_url(&self, handle: &ObjectHandle) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base,
            handle.encoded_bucket(),
            handle.encoded_name(),
        )
    }

    /// Media URL used when the server's metadata carries no `mediaLink`.
    #[must_use]
    pub fn media_url(&self, handle: &ObjectHandle) -> String {
        format!("{}?alt=media", self.object_url(handle))
    }
}
