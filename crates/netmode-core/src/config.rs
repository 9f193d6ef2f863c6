// ── Orchestrator configuration ──
//
// Built by the configuration layer (or by tests) and handed to the
// orchestrator. Core never reads a config file itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filesystem locations. All logical paths are resolved under `root`.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub mode_config: PathBuf,
    pub backup_dir: PathBuf,
    pub state_dir: PathBuf,
    pub init_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            mode_config: PathBuf::from("/etc/config/network-modes"),
            backup_dir: PathBuf::from("/etc/network-modes-backup"),
            // `/var` is tmpfs on OpenWrt; the pending deadline must survive a reboot.
            state_dir: PathBuf::from("/etc/network-modes-state"),
            init_dir: PathBuf::from("/etc/init.d"),
        }
    }
}

impl Paths {
    /// Paths rooted at `root` with every other location at its default.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Map a logical absolute path (`/etc/config/network`) onto the root.
    pub fn resolve(&self, logical: impl AsRef<Path>) -> PathBuf {
        let logical = logical.as_ref();
        let relative = logical.strip_prefix("/").unwrap_or(logical);
        self.root.join(relative)
    }

    pub fn mode_config(&self) -> PathBuf {
        self.resolve(&self.mode_config)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.state_dir)
    }

    pub fn init_dir(&self) -> PathBuf {
        self.resolve(&self.init_dir)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub paths: Paths,
    pub confirmation_window: Duration,
    pub snapshot_retain: usize,
    /// Zero disables the age bound.
    pub snapshot_max_age: Duration,
    pub history_limit: usize,
    pub command_timeout: Duration,
    /// Upper bound on one batch of config file or snapshot I/O.
    pub file_timeout: Duration,
    pub health_timeout: Duration,
    pub health_poll: Duration,
    /// Total attempts per service restart, including the first.
    pub restart_attempts: u32,
    pub watchdog_tick: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            confirmation_window: Duration::from_secs(120),
            snapshot_retain: 5,
            snapshot_max_age: Duration::from_secs(30 * 24 * 3600),
            history_limit: 100,
            command_timeout: Duration::from_secs(30),
            file_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(20),
            health_poll: Duration::from_millis(500),
            restart_attempts: 1,
            watchdog_tick: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths::under(root),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_under_root() {
        let paths = Paths::under("/tmp/img");
        assert_eq!(
            paths.resolve("/etc/config/network"),
            PathBuf::from("/tmp/img/etc/config/network")
        );
        assert_eq!(
            paths.state_dir(),
            PathBuf::from("/tmp/img/etc/network-modes-state")
        );
        assert_eq!(
            Paths::default().resolve("/etc/init.d"),
            PathBuf::from("/etc/init.d")
        );
    }

    #[test]
    fn default_state_lives_on_persistent_flash() {
        let paths = Paths::default();
        assert!(!paths.state_dir.starts_with("/var"));
        assert!(!paths.state_dir.starts_with("/tmp"));
        assert!(paths.state_dir.starts_with("/etc"));
    }
}
