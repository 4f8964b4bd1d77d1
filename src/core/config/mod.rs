//! Configuration loading with env-var overrides.
//!
//! Two layers live here:
//!
//! - **daemon settings**: a TOML file (`config/default.toml` unless `-f` is
//!   given) resolved into [`Config`], with `MESHNODE_*` env overrides.
//! - **node configuration**: the `Key = Value` store ([`ConfigTree`]) read
//!   from the confbase (`meshnode.conf`, `hosts/<name>`), consumed by
//!   network bring-up.
//!
//! # Module layout
//!
//! - **types**: resolved settings (`Config`, `Overrides`).
//! - **raw**: serde target mirroring the TOML file; kept private.
//! - **load**: `merge_toml`, `load_raw_merged`, `load`, `load_from`, `expand_home`.
//! - **tree**: `ConfigTree`, `ConfigEntry`, `Layer`.

mod load;
mod raw;
pub mod tree;
mod types;

pub use load::{expand_home, load, load_from};
pub use tree::{ConfigEntry, ConfigTree, Layer};
pub use types::*;

#[cfg(test)]
impl Config {
    /// Settings rooted at `config_dir` with no netname and no extra options.
    pub fn test_default(config_dir: &std::path::Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            netname: None,
            log_level: raw::default_log_level(),
            log_file: None,
            options: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[daemon]
config_dir = "/srv/meshnode"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    fn write_named(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.config_dir, std::path::PathBuf::from("/srv/meshnode"));
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.netname.is_none());
        assert!(cfg.options.is_empty());
    }

    #[test]
    fn confbase_includes_netname() {
        let f = write_toml("[daemon]\nconfig_dir = \"/srv/meshnode\"\nnetname = \"office\"\n");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.confbase(), std::path::PathBuf::from("/srv/meshnode/office"));
        assert_eq!(
            cfg.server_config_path(),
            std::path::PathBuf::from("/srv/meshnode/office/meshnode.conf")
        );
    }

    #[test]
    fn empty_netname_means_none() {
        let f = write_toml("[daemon]\nconfig_dir = \"/srv\"\nnetname = \"\"\n");
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert!(cfg.netname.is_none());
        assert_eq!(cfg.confbase(), std::path::PathBuf::from("/srv"));
    }

    #[test]
    fn netname_with_separator_rejected() {
        let f = write_toml("[daemon]\nnetname = \"../etc\"\n");
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("netname"));

        let mut cfg = Config::test_default(std::path::Path::new("/srv"));
        assert!(cfg.set_netname("a/b").is_err());
        cfg.set_netname("lab").unwrap();
        assert_eq!(cfg.confbase(), std::path::PathBuf::from("/srv/lab"));
    }

    #[test]
    fn options_table_renders_key_value_pairs() {
        let toml = r#"
[options]
Compression = 9
TunnelServer = true
Cipher = "aes-256-cbc"
ConnectTo = ["bob", "carol"]
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert!(cfg.options.contains(&"Compression=9".to_string()));
        assert!(cfg.options.contains(&"TunnelServer=yes".to_string()));
        assert!(cfg.options.contains(&"Cipher=aes-256-cbc".to_string()));
        let connect: Vec<_> = cfg.options.iter().filter(|o| o.starts_with("ConnectTo=")).collect();
        assert_eq!(connect, ["ConnectTo=bob", "ConnectTo=carol"]);
    }

    #[test]
    fn unsupported_option_type_errors() {
        let f = write_toml("[options]\nMaxTimeout = 1.5\n");
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("MaxTimeout"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.meshnode");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".meshnode"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), std::path::PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), std::path::PathBuf::from("relative/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(std::path::Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn overrides_win_over_file() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            config_dir: Some("/tmp/mesh-override".into()),
            netname: Some("lab".into()),
            log_level: Some("debug".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.config_dir, std::path::PathBuf::from("/tmp/mesh-override"));
        assert_eq!(cfg.netname.as_deref(), Some("lab"));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn overlay_keeps_base_fields() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", "[daemon]\nconfig_dir = \"/srv/base\"\nlog_level = \"info\"\n[options]\nPort = \"700\"\n");
        let overlay = r#"
[meta]
base = "base.toml"

[daemon]
log_level = "debug"

[options]
Mode = "switch"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, &Overrides::default()).unwrap();
        assert_eq!(cfg.config_dir, std::path::PathBuf::from("/srv/base"));
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.options.contains(&"Port=700".to_string()));
        assert!(cfg.options.contains(&"Mode=switch".to_string()));
    }

    #[test]
    fn missing_base_errors() {
        let dir = TempDir::new().unwrap();
        let overlay_path = write_named(&dir, "overlay.toml", "[meta]\nbase = \"nonexistent.toml\"\n");
        let msg = load_from(&overlay_path, &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("cannot read"));
    }

    #[test]
    fn cycle_detection() {
        let dir = TempDir::new().unwrap();
        let self_path = dir.path().join("self.toml");
        let content = format!("[meta]\nbase = \"{}\"\n\n{MINIMAL_TOML}", self_path.display());
        std::fs::write(&self_path, content).unwrap();
        let msg = load_from(&self_path, &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("circular"));
    }
}
