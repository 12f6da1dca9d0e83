//! Configuration file – reads/writes `~/.camctl/config.toml`.
//!
//! ```toml
//! [device]
//! model = "camctl-sim"
//! width = 640
//! height = 480
//! grab_delay_ms = 33
//!
//! [control]
//! busy_poll_ms = 5
//! busy_timeout_ms = 2000
//! idle_ms = 5
//! ```
//!
//! Missing sections or keys fall back to their defaults.

use camctl_runtime::SessionConfig;
use camctl_types::CamError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CamError),
}

/// The simulated device the shell drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Wall-clock time each simulated grab takes.
    #[serde(default = "default_grab_delay_ms")]
    pub grab_delay_ms: u64,
}

/// Momentary-control and acquisition timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_busy_poll_ms")]
    pub busy_poll_ms: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

/// Persisted configuration stored in `~/.camctl/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

fn default_model() -> String {
    "camctl-sim".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_grab_delay_ms() -> u64 {
    33
}
fn default_busy_poll_ms() -> u64 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    2000
}
fn default_idle_ms() -> u64 {
    5
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            width: default_width(),
            height: default_height(),
            grab_delay_ms: default_grab_delay_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            busy_poll_ms: default_busy_poll_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            idle_ms: default_idle_ms(),
        }
    }
}

impl Config {
    /// The validated session timing this configuration describes.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the timing fails
    /// [`SessionConfig::validate`].
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let session = SessionConfig {
            busy_poll_interval: Duration::from_millis(self.control.busy_poll_ms),
            busy_timeout: Duration::from_millis(self.control.busy_timeout_ms),
            idle_interval: Duration::from_millis(self.control.idle_ms),
            ..SessionConfig::default()
        };
        session.validate()?;
        Ok(session)
    }
}

/// Return the path to `~/.camctl/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".camctl").join("config.toml")
}

/// Where the effective configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    File,
    /// No config file exists yet.
    Missing,
    /// The file could not be read or parsed; defaults were used.
    Fallback(ConfigError),
}

/// Load the config from disk, falling back to defaults, then apply
/// `CAMCTL_*` overrides.
pub fn load() -> (Config, ConfigSource) {
    load_effective_from(&config_path())
}

/// Environment overrides apply whichever way the base config was obtained.
pub(crate) fn load_effective_from(path: &Path) -> (Config, ConfigSource) {
    let (mut cfg, source) = match load_from(path) {
        Ok(Some(cfg)) => (cfg, ConfigSource::File),
        Ok(None) => (Config::default(), ConfigSource::Missing),
        Err(e) => (Config::default(), ConfigSource::Fallback(e)),
    };
    apply_env_overrides(&mut cfg);
    (cfg, source)
}

/// Load the config from a specific path, without environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `CAMCTL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CAMCTL_SIM_MODEL` | `device.model` |
/// | `CAMCTL_BUSY_POLL_MS` | `control.busy_poll_ms` |
/// | `CAMCTL_BUSY_TIMEOUT_MS` | `control.busy_timeout_ms` |
/// | `CAMCTL_IDLE_MS` | `control.idle_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CAMCTL_SIM_MODEL") {
        cfg.device.model = v;
    }
    if let Ok(v) = std::env::var("CAMCTL_BUSY_POLL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.control.busy_poll_ms = ms;
    }
    if let Ok(v) = std::env::var("CAMCTL_BUSY_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.control.busy_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("CAMCTL_IDLE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.control.idle_ms = ms;
    }
}

/// Save the config to disk, creating `~/.camctl/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    // Owner read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_session_config() {
        let session = Config::default().session_config().expect("valid");
        assert_eq!(session.busy_poll_interval, Duration::from_millis(5));
        assert_eq!(session.busy_timeout, Duration::from_millis(2000));
        assert_eq!(session.idle_interval, Duration::from_millis(5));
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let mut cfg = Config::default();
        cfg.control.busy_poll_ms = 0;
        assert!(matches!(
            cfg.session_config(),
            Err(ConfigError::Invalid(CamError::InvalidConfig(_)))
        ));

        let mut cfg = Config::default();
        cfg.control.busy_poll_ms = 50;
        cfg.control.busy_timeout_ms = 10;
        assert!(cfg.session_config().is_err());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str("[control]\nbusy_timeout_ms = 500\n").expect("parse");
        assert_eq!(cfg.control.busy_timeout_ms, 500);
        assert_eq!(cfg.control.busy_poll_ms, 5);
        assert_eq!(cfg.device, DeviceConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device\nmodel = ").expect("write");
        assert!(matches!(load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.device.model = "acA1920-sim".to_string();
        cfg.device.grab_delay_ms = 10;
        cfg.control.idle_ms = 2;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn config_path_points_to_camctl_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".camctl"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_model() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("CAMCTL_SIM_MODEL", "override-sim") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.device.model, "override-sim");
        unsafe { std::env::remove_var("CAMCTL_SIM_MODEL") };
    }

    #[test]
    fn env_overrides_busy_timeout() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("CAMCTL_BUSY_TIMEOUT_MS", "750") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.busy_timeout_ms, 750);
        unsafe { std::env::remove_var("CAMCTL_BUSY_TIMEOUT_MS") };
    }

    #[test]
    fn env_overrides_apply_without_a_usable_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("CAMCTL_BUSY_POLL_MS", "7") };

        let (cfg, source) = load_effective_from(&path);
        assert!(matches!(source, ConfigSource::Missing));
        assert_eq!(cfg.control.busy_poll_ms, 7);

        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, "[control\nbusy_poll_ms = ").expect("write");
        let (cfg, source) = load_effective_from(&path);
        assert!(matches!(source, ConfigSource::Fallback(ConfigError::Parse(_))));
        assert_eq!(cfg.control.busy_poll_ms, 7);
        assert_eq!(cfg.device, DeviceConfig::default());

        unsafe { std::env::remove_var("CAMCTL_BUSY_POLL_MS") };
    }

    #[test]
    fn env_override_ignores_garbage() {
        // SAFETY: each env test owns a distinct variable.
        unsafe { std::env::set_var("CAMCTL_IDLE_MS", "soon") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control.idle_ms, default_idle_ms());
        unsafe { std::env::remove_var("CAMCTL_IDLE_MS") };
    }
}
