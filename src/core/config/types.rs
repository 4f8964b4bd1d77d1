//! Public configuration types.
//!
//! These are the resolved, ready-to-use settings the daemon consumes.
//! Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;

/// Name of the main node configuration file inside the confbase.
pub const SERVER_CONFIG_FILE: &str = "meshnode.conf";

/// Fully-resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding per-network configuration (already expanded, no `~`).
    pub config_dir: PathBuf,
    /// Optional network name; selects `config_dir/<netname>` as the confbase.
    pub netname: Option<String>,
    pub log_level: String,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Extra node options in `Key=Value` form, from the `[options]` table.
    /// These take precedence over everything read from the confbase.
    pub options: Vec<String>,
}

impl Config {
    /// Directory holding `meshnode.conf`, `hosts/`, `rsa_key.priv` and hook scripts.
    pub fn confbase(&self) -> PathBuf {
        match &self.netname {
            Some(net) => self.config_dir.join(net),
            None => self.config_dir.clone(),
        }
    }

    /// Path of the main node configuration file.
    pub fn server_config_path(&self) -> PathBuf {
        self.confbase().join(SERVER_CONFIG_FILE)
    }
}

/// Values that replace file settings, normally sourced from the environment.
/// Tests build this directly instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_dir: Option<String>,
    pub netname: Option<String>,
    pub log_level: Option<String>,
}
