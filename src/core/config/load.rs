//! Settings loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `MESHNODE_CONFIG_DIR`, `MESHNODE_NETNAME` and
//! `MESHNODE_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::{Config, Overrides};

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a settings file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

impl Overrides {
    /// Collect overrides from `MESHNODE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            config_dir: env::var("MESHNODE_CONFIG_DIR").ok(),
            netname: env::var("MESHNODE_NETNAME").ok(),
            log_level: env::var("MESHNODE_LOG_LEVEL").ok(),
        }
    }
}

/// Load settings from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve(RawConfig::default(), &overrides)
    }
}

/// Internal loader: accepts an explicit path and overrides.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let d = parsed.daemon;

    let config_dir = expand_home(overrides.config_dir.as_deref().unwrap_or(&d.config_dir));
    let log_level = overrides.log_level.clone().unwrap_or(d.log_level);
    let netname = overrides
        .netname
        .clone()
        .or(d.netname)
        .filter(|n| !n.is_empty());
    if let Some(net) = &netname {
        check_netname(net)?;
    }

    let mut options = Vec::new();
    for (key, value) in parsed.options {
        for rendered in render_option_values(&key, &value)? {
            options.push(format!("{key}={rendered}"));
        }
    }

    Ok(Config {
        config_dir,
        netname,
        log_level,
        log_file: d.log_file.map(|p| expand_home(&p)),
        options,
    })
}

/// Render one `[options]` entry as one or more option values.
/// Arrays expand to one value per element, in order.
fn render_option_values(key: &str, value: &toml::Value) -> Result<Vec<String>, AppError> {
    match value {
        toml::Value::String(s) => Ok(vec![s.clone()]),
        toml::Value::Integer(i) => Ok(vec![i.to_string()]),
        toml::Value::Boolean(b) => Ok(vec![if *b { "yes" } else { "no" }.to_string()]),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if matches!(item, toml::Value::Array(_)) {
                    return Err(AppError::Config(format!("nested array for option {key}")));
                }
                out.extend(render_option_values(key, item)?);
            }
            Ok(out)
        }
        other => Err(AppError::Config(format!(
            "unsupported value type `{}` for option {key}",
            other.type_str()
        ))),
    }
}

impl Config {
    /// Select a network name after loading, as `-n NAME` does.
    pub fn set_netname(&mut self, netname: &str) -> Result<(), AppError> {
        if netname.is_empty() {
            self.netname = None;
            return Ok(());
        }
        check_netname(netname)?;
        self.netname = Some(netname.to_string());
        Ok(())
    }
}

/// A network name becomes a directory component, so path separators and
/// leading dots are refused.
fn check_netname(netname: &str) -> Result<(), AppError> {
    if netname.starts_with('.') || netname.contains(['/', '\\']) {
        return Err(AppError::Config(format!("invalid character in netname: {netname:?}")));
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
