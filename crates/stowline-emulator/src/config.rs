//! Emulator configuration.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Emulator configuration, driven by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    /// Bind address.
    #[builder(default = String::from("127.0.0.1:4443"))]
    pub listen: String,
    /// Log level.
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4443".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from `EMULATOR_LISTEN` and `LOG_LEVEL`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("EMULATOR_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }
}
