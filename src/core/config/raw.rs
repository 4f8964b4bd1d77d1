//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Raw TOML shape, the serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub daemon: RawDaemon,
    /// `[options]`: node options keyed by variable name.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize)]
pub(super) struct RawDaemon {
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    #[serde(default)]
    pub netname: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for RawDaemon {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            netname: None,
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

pub(super) fn default_config_dir() -> String {
    "~/.meshnode".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}
