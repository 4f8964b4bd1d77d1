//! Node configuration store.
//!
//! Holds `Variable = Value` entries gathered from command-line options, the
//! main `meshnode.conf` and per-host fragments under `hosts/`. Variables
//! compare case-insensitively. When a variable appears more than once the
//! entries are ordered by source layer first (options, server file, host
//! fragment) and by reading order second, so a host fragment never shadows
//! a value set globally.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::node::Subnet;

/// Where an entry came from. Earlier layers win lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Options,
    Server,
    Host,
}

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub variable: String,
    pub value: String,
    pub file: Option<PathBuf>,
    pub line: usize,
    pub layer: Layer,
    seq: usize,
}

impl ConfigEntry {
    /// Human-readable origin used in error messages.
    pub fn location(&self) -> String {
        match &self.file {
            Some(file) => format!("line {} of {}", self.line, file.display()),
            None => "the command line".to_string(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, AppError> {
        match self.value.to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" => Ok(false),
            _ => Err(self.invalid("a boolean")),
        }
    }

    pub fn as_int(&self) -> Result<i64, AppError> {
        self.value.parse().map_err(|_| self.invalid("an integer"))
    }

    pub fn as_subnet(&self) -> Result<Subnet, AppError> {
        self.value.parse().map_err(|e| {
            AppError::Config(format!(
                "Subnet expected for configuration variable {} in {}: {e}",
                self.variable,
                self.location()
            ))
        })
    }

    fn invalid(&self, expected: &str) -> AppError {
        AppError::Config(format!(
            "{expected} expected for configuration variable {} in {}",
            self.variable,
            self.location()
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    entries: Vec<ConfigEntry>,
    /// `HOST.Variable=Value` options, applied once that host is read.
    host_options: Vec<(String, String, String)>,
    next_seq: usize,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one command-line style option (`Key=Value` or `HOST.Key=Value`).
    pub fn add_option(&mut self, option: &str) -> Result<(), AppError> {
        let (variable, value) = split_line(option)?
            .ok_or_else(|| AppError::Config(format!("empty option: {option:?}")))?;
        if value.is_empty() {
            return Err(AppError::Config(format!("No value for option {variable}")));
        }

        match variable.split_once('.') {
            Some((host, key)) if !host.is_empty() && !key.is_empty() => {
                self.host_options
                    .push((host.to_string(), key.to_string(), value.to_string()));
            }
            _ => self.push(variable, value, None, 0, Layer::Options),
        }
        Ok(())
    }

    /// Merge the options that were addressed to `host` with `HOST.Key=Value`.
    pub fn read_options_for(&mut self, host: &str) {
        let held = std::mem::take(&mut self.host_options);
        for (target, variable, value) in held {
            if target == host {
                self.push(&variable, &value, None, 0, Layer::Options);
            } else {
                self.host_options.push((target, variable, value));
            }
        }
    }

    pub fn read_file(&mut self, path: &Path, layer: Layer) -> Result<(), AppError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "Cannot open config file {}: {e}",
                path.display()
            ))
        })?;
        self.parse_str(&text, Some(path), layer)
    }

    /// Parse fragment text. `file` is recorded for error messages only.
    pub fn parse_str(
        &mut self,
        text: &str,
        file: Option<&Path>,
        layer: Layer,
    ) -> Result<(), AppError> {
        let mut in_pem = false;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if in_pem {
                if line.starts_with("-----END") {
                    in_pem = false;
                }
                continue;
            }
            if line.starts_with("-----BEGIN") {
                in_pem = true;
                continue;
            }

            let Some((variable, value)) = split_line(line)? else {
                continue;
            };
            if value.is_empty() {
                let origin = file
                    .map(|f| f.display().to_string())
                    .unwrap_or_else(|| "<inline>".into());
                return Err(AppError::Config(format!(
                    "No value for variable `{variable}' on line {} while reading config file {origin}",
                    idx + 1
                )));
            }
            self.push(variable, value, file.map(Path::to_path_buf), idx + 1, layer);
        }
        Ok(())
    }

    /// Highest-priority entry for `variable`.
    pub fn lookup(&self, variable: &str) -> Option<&ConfigEntry> {
        self.entries
            .iter()
            .filter(|e| e.variable.eq_ignore_ascii_case(variable))
            .min_by_key(|e| (e.layer, e.seq))
    }

    /// Every entry for `variable`, in priority order.
    pub fn lookup_all(&self, variable: &str) -> Vec<&ConfigEntry> {
        let mut found: Vec<&ConfigEntry> = self
            .entries
            .iter()
            .filter(|e| e.variable.eq_ignore_ascii_case(variable))
            .collect();
        found.sort_by_key(|e| (e.layer, e.seq));
        found
    }

    pub fn get_string(&self, variable: &str) -> Option<&str> {
        self.lookup(variable).map(|e| e.value.as_str())
    }

    pub fn get_bool(&self, variable: &str) -> Result<Option<bool>, AppError> {
        self.lookup(variable).map(ConfigEntry::as_bool).transpose()
    }

    pub fn get_int(&self, variable: &str) -> Result<Option<i64>, AppError> {
        self.lookup(variable).map(ConfigEntry::as_int).transpose()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, variable: &str, value: &str, file: Option<PathBuf>, line: usize, layer: Layer) {
        self.entries.push(ConfigEntry {
            variable: variable.to_string(),
            value: value.to_string(),
            file,
            line,
            layer,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }
}

/// Split `Key = Value`, `Key=Value` or `Key Value`.
/// Returns `None` for blank and comment lines.
fn split_line(line: &str) -> Result<Option<(&str, &str)>, AppError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (variable, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();

    if variable.is_empty() {
        return Err(AppError::Config(format!("missing variable name in {line:?}")));
    }
    Ok(Some((variable, value)))
}
