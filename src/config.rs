//! Layered configuration.
//!
//! Loads an optional `config.toml` from the directory resolved by:
//! `SIMPLE_SENDER_CONFIG_DIR` env var, then the OS-conventional per-user
//! config directory, falling back to the home directory and then a temp
//! directory if neither is writable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Env var overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "SIMPLE_SENDER_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no writable config directory found")]
    NoWritableDir,
    #[error("reading config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parsing config.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serializing config.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted, user-editable application settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub poll_interval_ms: u64,
    pub handshake_timeout_ms: u64,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_factor: f64,
    pub reconnect_cap_ms: u64,
    pub stop_mode: StopModeSetting,
    pub rx_window_floor: u32,
    pub rx_window_default_cap: u32,
    pub streaming_line_threshold: usize,
    pub streaming_byte_threshold: u64,
    pub macro_search_paths: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StopModeSetting {
    #[default]
    SoftResetOnly,
    StopStreamThenReset,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            handshake_timeout_ms: 10_000,
            reconnect_initial_backoff_ms: 1_000,
            reconnect_factor: 2.0,
            reconnect_cap_ms: 30_000,
            stop_mode: StopModeSetting::SoftResetOnly,
            rx_window_floor: 64,
            rx_window_default_cap: 128,
            streaming_line_threshold: 20_000,
            streaming_byte_threshold: 8 * 1024 * 1024,
            macro_search_paths: Vec::new(),
        }
    }
}

impl AppSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }
}

/// Resolved config directory plus loaded/default settings.
pub struct ConfigCtx {
    pub dir: PathBuf,
    pub settings: AppSettings,
}

impl ConfigCtx {
    /// Resolves the config directory and loads `config.toml` from it, if
    /// present, falling back to defaults when the file is absent.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = resolve_config_dir()?;
        let path = dir.join(CONFIG_FILE_NAME);
        let settings = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            toml::from_str(&text)?
        } else {
            debug!(path = %path.display(), "no config.toml found, using defaults");
            AppSettings::default()
        };
        Ok(Self { dir, settings })
    }

    /// Writes the current settings back to `config.toml` in `self.dir`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(&self.settings)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(CONFIG_FILE_NAME), text)?;
        Ok(())
    }
}

/// Resolves the config directory: env override, then OS config dir, then
/// home, then temp, in that order.
fn resolve_config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(custom) = std::env::var(CONFIG_DIR_ENV) {
        let path = PathBuf::from(custom);
        if ensure_writable(&path) {
            return Ok(path);
        }
        warn!(dir = %path.display(), "{} set but not writable, falling back", CONFIG_DIR_ENV);
    }

    if let Some(dir) = dirs::config_dir().map(|d| d.join("grbl-streamer")) {
        if ensure_writable(&dir) {
            return Ok(dir);
        }
    }

    if let Some(home) = dirs::home_dir().map(|d| d.join(".grbl-streamer")) {
        if ensure_writable(&home) {
            return Ok(home);
        }
    }

    let tmp = std::env::temp_dir().join("grbl-streamer");
    if ensure_writable(&tmp) {
        return Ok(tmp);
    }

    Err(ConfigError::NoWritableDir)
}

fn ensure_writable(dir: &Path) -> bool {
    std::fs::create_dir_all(dir).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_spec_constants() {
        let s = AppSettings::default();
        assert_eq!(s.rx_window_floor, 64);
        assert_eq!(s.rx_window_default_cap, 128);
        assert_eq!(s.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(s.reconnect_cap(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_dir_env_override_is_used_and_writable() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom-cfg");
        std::env::set_var(CONFIG_DIR_ENV, &custom);
        let resolved = resolve_config_dir().unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(resolved, custom);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ConfigCtx {
            dir: dir.path().to_path_buf(),
            settings: AppSettings::default(),
        };
        ctx.settings.poll_interval_ms = 500;
        ctx.save().unwrap();

        let text = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        let loaded: AppSettings = toml::from_str(&text).unwrap();
        assert_eq!(loaded.poll_interval_ms, 500);
    }

    #[test]
    fn test_load_falls_back_to_defaults_when_missing() {
        std::env::remove_var(CONFIG_DIR_ENV);
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(CONFIG_DIR_ENV, dir.path());
        let ctx = ConfigCtx::load().unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(ctx.settings, AppSettings::default());
    }
}
