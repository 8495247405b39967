//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. `gatekey.toml` next to the executable
//! 2. `~/.config/gatekey/config.toml`
//! 3. Environment variable overrides (e.g. `GATEKEY_DATA_DIR`)
//!
//! CLI arguments always take precedence over config file values.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ResultExt as _};

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatekeyConfig {
    pub paths: PathsConfig,
    pub undo: UndoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `guests.json` and `event_config.json`.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Seconds a deleted guest stays recoverable.
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines structured log file.  Empty string means no
    /// file logging.
    pub json_log_file: String,
    /// Whether to also output JSON to stdout.
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for GatekeyConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            undo: UndoConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("gatekey-data"),
        }
    }
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self { window_secs: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl GatekeyConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: GatekeyConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        Ok(cfg)
    }

    /// Load config using the standard search order:
    /// 1. Explicit path (if given)
    /// 2. `gatekey.toml` next to the running binary
    /// 3. `~/.config/gatekey/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        // Next to executable.
        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("gatekey.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        // Platform-standard config directory.
        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home)
                .join(".config")
                .join("gatekey")
                .join("config.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("GATEKEY_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("GATEKEY_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = GatekeyConfig::default();
        assert_eq!(cfg.paths.data_dir, PathBuf::from("gatekey-data"));
        assert_eq!(cfg.undo.window_secs, 5);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_missing_file_returns_default() {
        let cfg = GatekeyConfig::load_from(Path::new("nonexistent_file_xyz.toml")).unwrap();
        assert_eq!(cfg.undo.window_secs, 5);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[undo]
window_secs = 12
"#;
        let cfg: GatekeyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.undo.window_secs, 12);
        // Other sections should be defaults.
        assert_eq!(cfg.paths.data_dir, PathBuf::from("gatekey-data"));
    }

    #[test]
    fn malformed_toml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[[[").unwrap();
        assert!(GatekeyConfig::load_from(&path).is_err());
    }
}
