//! Checksum computation and comparison for transferred objects.
//!
//! Digests are base64-encoded exactly as the JSON API reports them in the
//! `md5Hash` and `crc32c` fields of an object resource:
//!
//! - MD5: the 16-byte digest.
//! - CRC32C: the 4-byte Castagnoli CRC in big-endian order.
//!
//! # Streaming Validation
//!
//! Payloads are never buffered for validation. Feed chunks to a
//! [`StreamingValidator`] as they are written or read, then compare its
//! [`StreamingValidator::digest`] with the server's value via [`matches`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use digest::Digest;
use stowline_core::{ObjectMetadata, ValidationMode};

// ---------------------------------------------------------------------------
// Standalone checksum functions
// ---------------------------------------------------------------------------

/// Compute the base64-encoded digest of `data` for `mode`.
///
/// Returns `None` for [`ValidationMode::None`].
///
/// # Examples
///
/// ```
/// use stowline_core::ValidationMode;
/// use stowline_transfer::checksums::compute;
///
/// assert_eq!(
///     compute(ValidationMode::Md5, b"hello").as_deref(),
///     Some("XUFAKrxLKna5cZ2REBfFkg==")
/// );
/// assert_eq!(compute(ValidationMode::None, b"hello"), None);
/// ```
#[must_use]
pub fn compute(mode: ValidationMode, data: &[u8]) -> Option<String> {
    match mode {
        ValidationMode::None => None,
        ValidationMode::Md5 => Some(BASE64_STANDARD.encode(md5::Md5::digest(data))),
        ValidationMode::Crc32c => Some(BASE64_STANDARD.encode(crc32c::crc32c(data).to_be_bytes())),
    }
}

/// Strip an `<algorithm>=` prefix (as used in `x-goog-hash` style values)
/// from a server-reported digest.
#[must_use]
pub fn normalize_server_digest(value: &str) -> &str {
    let value = value.trim();
    for prefix in ["crc32c=", "md5="] {
        if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return &value[prefix.len()..];
        }
    }
    value
}

/// Compare a locally computed digest with the server-reported one.
///
/// [`ValidationMode::None`] always matches.
#[must_use]
pub fn matches(mode: ValidationMode, local: &str, server: &str) -> bool {
    match mode {
        ValidationMode::None => true,
        ValidationMode::Md5 | ValidationMode::Crc32c => local == normalize_server_digest(server),
    }
}

/// Select the server-reported digest field for `mode` from an object resource.
#[must_use]
pub fn server_digest(mode: ValidationMode, metadata: &ObjectMetadata) -> Option<&str> {
    match mode {
        ValidationMode::None => None,
        ValidationMode::Md5 => metadata.md5_hash.as_deref(),
        ValidationMode::Crc32c => metadata.crc32c.as_deref(),
    }
}

// ---------------------------------------------------------------------------
// StreamingValidator
// ---------------------------------------------------------------------------

/// Incremental digest over a stream of chunks.
///
/// # Examples
///
/// ```
/// use stowline_core::ValidationMode;
/// use stowline_transfer::checksums::{StreamingValidator, compute};
///
/// let mut validator = StreamingValidator::new(ValidationMode::Crc32c);
/// validator.update(b"hello ");
/// validator.update(b"world");
/// assert_eq!(validator.digest(), compute(ValidationMode::Crc32c, b"hello world"));
/// assert_eq!(validator.bytes_seen(), 11);
/// ```
#[derive(Debug, Clone)]
pub struct StreamingValidator {
    mode: ValidationMode,
    md5: Option<md5::Md5>,
    crc32c: Option<u32>,
    bytes_seen: u64,
}

impl StreamingValidator {
    /// Create a validator for `mode`.
    #[must_use]
    pub fn new(mode: ValidationMode) -> Self {
        let (md5, crc32c) = match mode {
            ValidationMode::None => (None, None),
            ValidationMode::Md5 => (Some(<md5::Md5 as Digest>::new()), None),
            ValidationMode::Crc32c => (None, Some(0)),
        };
        Self {
            mode,
            md5,
            crc32c,
            bytes_seen: 0,
        }
    }

    /// The validation mode.
    #[must_use]
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Feed more data.
    pub fn update(&mut self, data: &[u8]) {
        self.bytes_seen += data.len() as u64;
        if let Some(ref mut h) = self.md5 {
            Digest::update(h, data);
        }
        if let Some(ref mut val) = self.crc32c {
            *val = crc32c::crc32c_append(*val, data);
        }
    }

    /// Total number of bytes fed so far.
    #[must_use]
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Base64 digest of everything fed so far, or `None` when validation is off.
    ///
    /// Does not consume the validator, so it can be called while more data
    /// is still expected.
    #[must_use]
    pub fn digest(&self) -> Option<String> {
        match self.mode {
            ValidationMode::None => None,
            ValidationMode::Md5 => {
                let hash = Digest::finalize(self.md5.clone().unwrap_or_default());
                Some(BASE64_STANDARD.encode(hash))
            }
            ValidationMode::Crc32c => {
                let val = self.crc32c.unwrap_or(0);
                Some(BASE64_STANDARD.encode(val.to_be_bytes()))
            }
        }
    }

    /// Consume the validator and return the final digest.
    #[must_use]
    pub fn finish(self) -> Option<String> {
        self.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_compute_md5_digest() {
        assert_eq!(
            compute(ValidationMode::Md5, b"").as_deref(),
            Some("1B2M2Y8AsgTpgAmY7PhCfg==")
        );
        assert_eq!(
            compute(ValidationMode::Md5, b"hello").as_deref(),
            Some("XUFAKrxLKna5cZ2REBfFkg==")
        );
    }

    #[test]
    fn test_should_compute_crc32c_digest() {
        assert_eq!(
            compute(ValidationMode::Crc32c, b"").as_deref(),
            Some("AAAAAA==")
        );
        // CRC-32C check value for "123456789" is 0xE3069283.
        let expected = BASE64_STANDARD.encode(0xE306_9283_u32.to_be_bytes());
        assert_eq!(
            compute(ValidationMode::Crc32c, b"123456789"),
            Some(expected)
        );
    }

    #[test]
    fn test_should_skip_digest_for_none() {
        assert_eq!(compute(ValidationMode::None, b"data"), None);
        assert_eq!(StreamingValidator::new(ValidationMode::None).digest(), None);
    }

    #[test]
    fn test_should_always_match_when_validation_disabled() {
        assert!(matches(ValidationMode::None, "a", "b"));
    }

    #[test]
    fn test_should_detect_mismatch() {
        let local = compute(ValidationMode::Md5, b"bad-data").unwrap();
        let remote = compute(ValidationMode::Md5, b"data").unwrap();
        assert!(!matches(ValidationMode::Md5, &local, &remote));
        assert!(matches(ValidationMode::Md5, &remote, &remote));
    }

    #[test]
    fn test_should_strip_algorithm_prefix_from_server_digest() {
        let local = compute(ValidationMode::Crc32c, b"data").unwrap();
        let prefixed = format!("crc32c={local}");
        assert_eq!(normalize_server_digest(&prefixed), local);
        assert!(matches(ValidationMode::Crc32c, &local, &prefixed));
        assert_eq!(normalize_server_digest("MD5=abc=="), "abc==");
        assert_eq!(normalize_server_digest("abc=="), "abc==");
    }

    #[test]
    fn test_should_select_server_digest_field() {
        let metadata = ObjectMetadata {
            md5_hash: Some("m".to_owned()),
            crc32c: Some("c".to_owned()),
            ..ObjectMetadata::default()
        };
        assert_eq!(server_digest(ValidationMode::Md5, &metadata), Some("m"));
        assert_eq!(server_digest(ValidationMode::Crc32c, &metadata), Some("c"));
        assert_eq!(server_digest(ValidationMode::None, &metadata), None);
    }

    #[test]
    fn test_should_match_single_shot_and_streaming_results() {
        let data = b"The quick brown fox jumps over the lazy dog";

        for mode in [ValidationMode::Md5, ValidationMode::Crc32c] {
            let mut validator = StreamingValidator::new(mode);
            validator.update(&data[..10]);
            validator.update(&data[10..30]);
            // Intermediate digests must not disturb the running state.
            let _ = validator.digest();
            validator.update(&data[30..]);
            assert_eq!(validator.digest(), compute(mode, data));
            assert_eq!(validator.bytes_seen(), data.len() as u64);
        }
    }
}
