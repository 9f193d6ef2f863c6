// ── Service control ──
//
// The orchestrator drives services through `ServiceManager` so tests can
// script restarts and health. The production implementation shells out to
// OpenWrt init scripts with a bounded timeout per command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cannot run {service} {action}: {source}")]
    Spawn {
        service: String,
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} {action} failed ({status}): {stderr}")]
    Failed {
        service: String,
        action: String,
        status: String,
        stderr: String,
    },

    #[error("{service} {action} timed out after {timeout:?}")]
    Timeout {
        service: String,
        action: String,
        timeout: Duration,
    },

    #[error("{service} did not report running within {timeout:?}")]
    Unhealthy { service: String, timeout: Duration },

    #[error("{service} is not installed")]
    NotInstalled { service: String },
}

impl ServiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unhealthy { .. })
    }
}

/// Control surface over system services.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn is_installed(&self, service: &str) -> bool;

    async fn is_enabled(&self, service: &str) -> Result<bool, ServiceError>;

    async fn is_running(&self, service: &str) -> Result<bool, ServiceError>;

    async fn set_enabled(&self, service: &str, enabled: bool) -> Result<(), ServiceError>;

    async fn restart(&self, service: &str) -> Result<(), ServiceError>;

    async fn stop(&self, service: &str) -> Result<(), ServiceError>;
}

// ── init.d implementation ────────────────────────────────────────────

/// Runs `<init_dir>/<service> <action>`.
#[derive(Debug, Clone)]
pub struct InitdServiceManager {
    init_dir: PathBuf,
    timeout: Duration,
}

impl InitdServiceManager {
    pub fn new(init_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            init_dir: init_dir.into(),
            timeout,
        }
    }

    pub fn init_dir(&self) -> &Path {
        &self.init_dir
    }

    /// Exit status 0 means `true`; any other exit code means `false`.
    async fn query_status(&self, service: &str, action: &str) -> Result<bool, ServiceError> {
        let output = self.run(service, action).await?;
        Ok(output.status.success())
    }

    async fn invoke(&self, service: &str, action: &str) -> Result<(), ServiceError> {
        let output = self.run(service, action).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ServiceError::Failed {
                service: service.to_owned(),
                action: action.to_owned(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    async fn run(&self, service: &str, action: &str) -> Result<std::process::Output, ServiceError> {
        let script = self.init_dir.join(service);
        debug!(service, action, script = %script.display(), "running init script");

        let child = Command::new(&script)
            .arg(action)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(ServiceError::Spawn {
                service: service.to_owned(),
                action: action.to_owned(),
                source,
            }),
            Err(_) => Err(ServiceError::Timeout {
                service: service.to_owned(),
                action: action.to_owned(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl ServiceManager for InitdServiceManager {
    async fn is_installed(&self, service: &str) -> bool {
        tokio::fs::metadata(self.init_dir.join(service))
            .await
            .is_ok_and(|m| m.is_file())
    }

    async fn is_enabled(&self, service: &str) -> Result<bool, ServiceError> {
        self.query_status(service, "enabled").await
    }

    async fn is_running(&self, service: &str) -> Result<bool, ServiceError> {
        self.query_status(service, "running").await
    }

    async fn set_enabled(&self, service: &str, enabled: bool) -> Result<(), ServiceError> {
        self.invoke(service, if enabled { "enable" } else { "disable" })
            .await
    }

    async fn restart(&self, service: &str) -> Result<(), ServiceError> {
        self.invoke(service, "restart").await
    }

    async fn stop(&self, service: &str) -> Result<(), ServiceError> {
        self.invoke(service, "stop").await
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn status_queries_map_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        script(
            dir.path(),
            "dnsmasq",
            r#"case "$1" in enabled) exit 0 ;; running) exit 1 ;; *) exit 0 ;; esac"#,
        );
        let svc = InitdServiceManager::new(dir.path(), Duration::from_secs(5));

        assert!(svc.is_installed("dnsmasq").await);
        assert!(!svc.is_installed("relayd").await);
        assert!(svc.is_enabled("dnsmasq").await.unwrap());
        assert!(!svc.is_running("dnsmasq").await.unwrap());
        assert!(svc.restart("dnsmasq").await.is_ok());
    }

    #[tokio::test]
    async fn failing_action_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "firewall", "echo 'bad zone' >&2; exit 3");
        let svc = InitdServiceManager::new(dir.path(), Duration::from_secs(5));

        match svc.restart("firewall").await {
            Err(ServiceError::Failed { stderr, .. }) => assert_eq!(stderr, "bad zone"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_action_times_out() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "network", "sleep 5");
        let svc = InitdServiceManager::new(dir.path(), Duration::from_millis(200));

        let err = svc.restart("network").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn missing_script_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = InitdServiceManager::new(dir.path(), Duration::from_secs(1));
        assert!(matches!(
            svc.stop("netifyd").await,
            Err(ServiceError::Spawn { .. })
        ));
    }
}
