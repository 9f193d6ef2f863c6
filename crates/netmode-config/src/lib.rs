//! Configuration for the netmode binary.
//!
//! TOML file + `NETMODE_*` environment, layered over built-in defaults with
//! figment, validated, then translated into [`netmode_core::OrchestratorConfig`].
//! Core never reads this file itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netmode_core::{OrchestratorConfig, Paths};

/// System-wide config location on the device.
pub const SYSTEM_CONFIG: &str = "/etc/netmode/config.toml";
/// Names an explicit config file.
pub const CONFIG_ENV: &str = "NETMODE_CONFIG";
const ENV_PREFIX: &str = "NETMODE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file already exists: {}", .0.display())]
    Exists(PathBuf),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub transition: TransitionConfig,
    pub services: ServicesConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Every other path is resolved under this one.
    pub root: PathBuf,
    pub mode_config: PathBuf,
    pub backup_dir: PathBuf,
    pub state_dir: PathBuf,
    pub init_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let paths = Paths::default();
        Self {
            root: paths.root,
            mode_config: paths.mode_config,
            backup_dir: paths.backup_dir,
            state_dir: paths.state_dir,
            init_dir: paths.init_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub confirmation_window_secs: u64,
    pub snapshot_retain: usize,
    /// Zero keeps snapshots regardless of age.
    pub snapshot_max_age_days: u64,
    pub history_limit: usize,
    /// Bound on one batch of snapshot or config file I/O.
    pub file_timeout_secs: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            confirmation_window_secs: 120,
            snapshot_retain: 5,
            snapshot_max_age_days: 30,
            history_limit: 100,
            file_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub command_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub health_poll_ms: u64,
    /// Total restart attempts per service, including the first.
    pub restart_attempts: u32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            health_timeout_secs: 20,
            health_poll_ms: 500,
            restart_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub tick_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            json: false,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Per-user location via XDG / platform conventions.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "netmode", "netmode").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Resolve which file to read: explicit flag, then `$NETMODE_CONFIG`, then
/// the system file if present, then the per-user file.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    let system = PathBuf::from(SYSTEM_CONFIG);
    if system.is_file() {
        return system;
    }
    user_config_path().unwrap_or(system)
}

// ── Config loading ──────────────────────────────────────────────────

/// The provider stack: defaults ← TOML file ← `NETMODE_*` environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate. A missing file is not an error.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_str).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a default config file, refusing to clobber one unless `force`.
pub fn init(path: &Path, force: bool) -> Result<Config, ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::Exists(path.to_path_buf()));
    }
    let config = Config::default();
    save(&config, path)?;
    Ok(config)
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = &self.paths;
        for (field, path) in [
            ("paths.root", &paths.root),
            ("paths.mode_config", &paths.mode_config),
            ("paths.backup_dir", &paths.backup_dir),
            ("paths.state_dir", &paths.state_dir),
            ("paths.init_dir", &paths.init_dir),
        ] {
            if !path.is_absolute() {
                return Err(invalid(
                    field,
                    format!("must be an absolute path, got '{}'", path.display()),
                ));
            }
        }

        let t = &self.transition;
        if t.confirmation_window_secs == 0 {
            return Err(invalid("transition.confirmation_window_secs", "must be at least 1"));
        }
        if t.snapshot_retain == 0 {
            return Err(invalid(
                "transition.snapshot_retain",
                "must keep at least one snapshot",
            ));
        }
        if t.history_limit == 0 {
            return Err(invalid("transition.history_limit", "must be at least 1"));
        }
        if t.file_timeout_secs == 0 {
            return Err(invalid("transition.file_timeout_secs", "must be at least 1"));
        }

        let s = &self.services;
        if s.command_timeout_secs == 0 {
            return Err(invalid("services.command_timeout_secs", "must be at least 1"));
        }
        if s.health_poll_ms == 0 {
            return Err(invalid("services.health_poll_ms", "must be at least 1"));
        }
        if s.restart_attempts == 0 {
            return Err(invalid("services.restart_attempts", "must be at least 1"));
        }
        if self.watchdog.tick_ms == 0 {
            return Err(invalid("watchdog.tick_ms", "must be at least 1"));
        }
        Ok(())
    }

    /// Override the root, e.g. from `--root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths.root = root.into();
        self
    }

    pub fn to_orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        self.validate()?;
        let t = &self.transition;
        let s = &self.services;
        Ok(OrchestratorConfig {
            paths: Paths {
                root: self.paths.root.clone(),
                mode_config: self.paths.mode_config.clone(),
                backup_dir: self.paths.backup_dir.clone(),
                state_dir: self.paths.state_dir.clone(),
                init_dir: self.paths.init_dir.clone(),
            },
            confirmation_window: Duration::from_secs(t.confirmation_window_secs),
            snapshot_retain: t.snapshot_retain,
            snapshot_max_age: Duration::from_secs(t.snapshot_max_age_days * 86_400),
            history_limit: t.history_limit,
            command_timeout: Duration::from_secs(s.command_timeout_secs),
            file_timeout: Duration::from_secs(t.file_timeout_secs),
            health_timeout: Duration::from_secs(s.health_timeout_secs),
            health_poll: Duration::from_millis(s.health_poll_ms),
            restart_attempts: s.restart_attempts,
            watchdog_tick: Duration::from_millis(self.watchdog.tick_ms),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_orchestrator_defaults() {
        let from_file = Config::default().to_orchestrator_config().unwrap();
        let core = OrchestratorConfig::default();
        assert_eq!(from_file.confirmation_window, core.confirmation_window);
        assert_eq!(from_file.snapshot_retain, core.snapshot_retain);
        assert_eq!(from_file.snapshot_max_age, core.snapshot_max_age);
        assert_eq!(from_file.health_poll, core.health_poll);
        assert_eq!(from_file.watchdog_tick, core.watchdog_tick);
        assert_eq!(from_file.file_timeout, core.file_timeout);
        assert_eq!(from_file.paths.state_dir(), core.paths.state_dir());
    }

    #[test]
    fn file_and_env_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "netmode.toml",
                r#"
                    [paths]
                    root = "/srv/image"

                    [transition]
                    confirmation_window_secs = 300
                    snapshot_retain = 9
                "#,
            )?;
            jail.set_env("NETMODE_TRANSITION__SNAPSHOT_RETAIN", "3");
            jail.set_env("NETMODE_LOGGING__JSON", "true");

            let config = load(Path::new("netmode.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.paths.root, PathBuf::from("/srv/image"));
            assert_eq!(config.transition.confirmation_window_secs, 300);
            assert_eq!(config.transition.snapshot_retain, 3);
            assert_eq!(config.transition.history_limit, 100);
            assert!(config.logging.json);

            let core = config.to_orchestrator_config().map_err(|e| e.to_string())?;
            assert_eq!(
                core.paths.state_dir(),
                PathBuf::from("/srv/image/etc/network-modes-state")
            );
            Ok(())
        });
    }

    #[test]
    fn missing_file_loads_defaults() {
        Jail::expect_with(|_| {
            let config = load(Path::new("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut config = Config::default();
        config.transition.confirmation_window_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("confirmation_window_secs"), "{err}");
    }

    #[test]
    fn relative_paths_are_rejected() {
        let config = Config::default().with_root("image");
        assert!(matches!(
            config.to_orchestrator_config(),
            Err(ConfigError::Validation { field, .. }) if field == "paths.root"
        ));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/netmode/config.toml");
        init(&path, false).unwrap();
        assert!(matches!(init(&path, false), Err(ConfigError::Exists(_))));
        init(&path, true).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
