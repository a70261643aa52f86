//! Transfer engine configuration.
//!
//! Provides [`TransferConfig`]. Values are loaded from environment variables,
//! with defaults matching the public JSON API endpoint.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Default API endpoint.
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Default payload size (5 MiB) at or below which a known-length upload uses
/// the simple strategy.
const DEFAULT_SIMPLE_UPLOAD_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Transfer engine configuration.
///
/// # Examples
///
/// ```
/// use stowline_core::TransferConfig;
///
/// let config = TransferConfig::default();
/// assert_eq!(config.endpoint, "https://storage.googleapis.com");
/// assert!(config.validate_downloads);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// Scheme and authority of the JSON API (e.g. `"http://127.0.0.1:4443"`).
    #[builder(default = String::from(DEFAULT_ENDPOINT))]
    pub endpoint: String,

    /// Directory holding the persisted upload sessions.
    #[builder(default = default_session_dir())]
    pub session_dir: String,

    /// Known payload length at or below which uploads default to the simple strategy.
    #[builder(default = DEFAULT_SIMPLE_UPLOAD_THRESHOLD)]
    pub simple_upload_threshold: u64,

    /// Whether downloads verify the server-reported checksums.
    #[builder(default = true)]
    pub validate_downloads: bool,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from(DEFAULT_ENDPOINT),
            session_dir: default_session_dir(),
            simple_upload_threshold: DEFAULT_SIMPLE_UPLOAD_THRESHOLD,
            validate_downloads: true,
            log_level: String::from("info"),
        }
    }
}

impl TransferConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STOWLINE_ENDPOINT` | `https://storage.googleapis.com` |
    /// | `STOWLINE_SESSION_DIR` | `$XDG_CONFIG_HOME/stowline` or `$HOME/.config/stowline` |
    /// | `STOWLINE_SIMPLE_UPLOAD_THRESHOLD` | `5242880` |
    /// | `STOWLINE_VALIDATE_DOWNLOADS` | `true` |
    /// | `LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("STOWLINE_ENDPOINT") {
            config.endpoint = v;
        }
        if let Ok(v) = std::env::var("STOWLINE_SESSION_DIR") {
            config.session_dir = v;
        }
        if let Ok(v) = std::env::var("STOWLINE_SIMPLE_UPLOAD_THRESHOLD") {
            if let Ok(n) = v.parse::<u64>() {
                config.simple_upload_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("STOWLINE_VALIDATE_DOWNLOADS") {
            config.validate_downloads = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Path of the session store file inside [`TransferConfig::session_dir`].
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        PathBuf::from(&self.session_dir).join("sessions.json")
    }
}

/// Per-user configuration directory for session state.
fn default_session_dir() -> String {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })
        .unwrap_or_else(std::env::temp_dir);
    base.join("stowline").to_string_lossy().into_owned()
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
