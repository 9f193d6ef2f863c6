// ── Apply engine ──
//
// Protocol for one mode change:
//   1. refuse if a transition is active or a required service is missing
//   2. snapshot every managed file and service state (durable)
//   3. persist an `applying` record
//   4. stage rendered files next to their targets, then rename each into place
//   5. restart services in declared order, waiting for health
//   6. persist `pending_confirmation` with an absolute deadline
// Failures before step 3 leave the device untouched. Any failure after
// step 3 rolls back immediately through the executor.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Paths;
use crate::error::CoreError;
use crate::model::{
    Mode, ModeChangeRequest, PendingTransition, RollbackReason, ServiceState, TransitionStatus,
};
use crate::orchestrator::Shared;
use crate::persist::{ModeRecord, TransitionLock, offload, sync_dir};
use crate::rollback::RollbackExecutor;
use crate::service::ServiceError;
use crate::template;

const STAGED_SUFFIX: &str = ".netmode-staged";

pub struct ApplyEngine<'a> {
    shared: &'a Shared,
}

impl<'a> ApplyEngine<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    #[instrument(skip_all, fields(mode = %request.target_mode))]
    pub async fn apply(
        &self,
        request: &ModeChangeRequest,
        lock: &TransitionLock,
    ) -> Result<PendingTransition, CoreError> {
        let shared = self.shared;

        if let Some(active) = shared.state.transition()?.filter(|t| t.status.is_active()) {
            return Err(CoreError::ConcurrentChange {
                status: active.status.to_string(),
            });
        }

        let record = shared.record.load()?;
        let from = shared.registry.get(record.current_mode);
        let to = shared.registry.get(request.target_mode);

        self.check_installed(to).await?;

        let service_states = self
            .capture_services()
            .await
            .map_err(|e| CoreError::SnapshotFailure {
                reason: format!("cannot read service state: {e}"),
            })?;
        let store = shared.snapshots.clone();
        let managed = shared.registry.managed_paths();
        let at = shared.clock.now();
        let snapshot = offload("snapshot", shared.config.file_timeout, move || {
            store.create(&managed, service_states, at)
        })
        .await
        .map_err(|e| match e {
            CoreError::SnapshotFailure { .. } => e,
            other => CoreError::SnapshotFailure {
                reason: other.to_string(),
            },
        })?;

        let now = shared.clock.now();
        let mut transition = PendingTransition {
            id: Uuid::new_v4(),
            from_mode: from.id,
            to_mode: to.id,
            parameters: request.parameters.clone(),
            snapshot_id: snapshot.id.clone(),
            applied_at: now,
            deadline: now + self.window()?,
            status: TransitionStatus::Applying,
            reason: None,
            error: None,
            resolved_at: None,
        };
        shared.state.save_transition(&transition, lock)?;
        info!(transition = %transition.id, from = %from.id, to = %to.id, snapshot = %snapshot.id, "applying");

        if let Err(cause) = self.write_and_restart(from, to, &transition, lock).await {
            return Err(self.fail(&mut transition, &cause, lock).await);
        }

        let now = shared.clock.now();
        transition.applied_at = now;
        transition.deadline = now + self.window()?;
        transition.status = TransitionStatus::PendingConfirmation;
        shared.state.save_transition(&transition, lock)?;
        info!(
            transition = %transition.id,
            deadline = %transition.deadline,
            "applied, awaiting confirmation"
        );
        Ok(transition)
    }

    fn window(&self) -> Result<chrono::Duration, CoreError> {
        chrono::Duration::from_std(self.shared.config.confirmation_window)
            .map_err(|e| CoreError::Internal(format!("confirmation window out of range: {e}")))
    }

    async fn write_and_restart(
        &self,
        from: &Mode,
        to: &Mode,
        transition: &PendingTransition,
        lock: &TransitionLock,
    ) -> Result<(), CoreError> {
        let files = template::render(to, &transition.parameters);
        let paths = self.shared.config.paths.clone();
        offload("config file swap", self.shared.config.file_timeout, move || {
            swap_files(&paths, &files)
        })
        .await?;
        self.shared.record.store(
            &ModeRecord {
                current_mode: to.id,
                last_change: Some(transition.applied_at),
            },
            lock,
        )?;
        self.restart_services(from, to).await
    }

    async fn fail(
        &self,
        transition: &mut PendingTransition,
        cause: &CoreError,
        lock: &TransitionLock,
    ) -> CoreError {
        let cause = cause.to_string();
        warn!(transition = %transition.id, %cause, "apply failed, rolling back");
        let reason = RollbackReason::ApplyFailed(cause.clone());
        match RollbackExecutor::new(self.shared)
            .execute(transition, reason, lock)
            .await
        {
            Ok(_) => CoreError::ApplyFailure {
                mode: transition.to_mode.to_string(),
                cause,
                rolled_back: true,
            },
            Err(e) => CoreError::RollbackFailure {
                reason: format!("apply failed ({cause}) and the rollback failed: {e}"),
            },
        }
    }

    /// Every service the target mode runs must exist before anything is
    /// written.
    async fn check_installed(&self, to: &Mode) -> Result<(), CoreError> {
        let services = self.shared.services.as_ref();
        let mut missing = Vec::new();
        for spec in to.affected_services.iter().filter(|s| s.enabled) {
            if !services.is_installed(spec.name).await {
                missing.push(spec.name);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(CoreError::ApplyFailure {
            mode: to.id.to_string(),
            cause: format!("required service not installed: {}", missing.join(", ")),
            rolled_back: false,
        })
    }

    /// Installed managed services and their current state. A state that
    /// cannot be read fails the capture.
    pub(crate) async fn capture_services(
        &self,
    ) -> Result<BTreeMap<String, ServiceState>, ServiceError> {
        let services = self.shared.services.as_ref();
        let mut out = BTreeMap::new();
        for name in self.shared.registry.managed_services() {
            if !services.is_installed(name).await {
                continue;
            }
            let enabled = services.is_enabled(name).await?;
            let running = services.is_running(name).await?;
            out.insert(name.to_owned(), ServiceState { enabled, running });
        }
        Ok(out)
    }

    async fn restart_services(&self, from: &Mode, to: &Mode) -> Result<(), CoreError> {
        let services = self.shared.services.as_ref();

        for leftover in from
            .affected_services
            .iter()
            .filter(|s| !to.affected_services.iter().any(|t| t.name == s.name))
        {
            if services.is_installed(leftover.name).await {
                debug!(service = leftover.name, "stopping service not used by target mode");
                services.stop(leftover.name).await?;
                services.set_enabled(leftover.name, false).await?;
            }
        }

        for spec in to.affected_services {
            let installed = services.is_installed(spec.name).await;
            if spec.enabled {
                if !installed {
                    return Err(ServiceError::NotInstalled {
                        service: spec.name.to_owned(),
                    }
                    .into());
                }
                services.set_enabled(spec.name, true).await?;
                self.restart_with_retry(spec.name).await?;
                self.wait_healthy(spec.name).await?;
            } else if installed {
                services.stop(spec.name).await?;
                services.set_enabled(spec.name, false).await?;
            }
            debug!(service = spec.name, enabled = spec.enabled, "service settled");
        }
        Ok(())
    }

    async fn restart_with_retry(&self, service: &str) -> Result<(), ServiceError> {
        let attempts = self.shared.config.restart_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.shared.services.restart(service).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(service, attempt, error = %e, "restart failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_healthy(&self, service: &str) -> Result<(), ServiceError> {
        let config = &self.shared.config;
        let deadline = Instant::now() + config.health_timeout;
        loop {
            if self.shared.services.is_running(service).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::Unhealthy {
                    service: service.to_owned(),
                    timeout: config.health_timeout,
                });
            }
            sleep(config.health_poll).await;
        }
    }
}

/// Stage every file as a hidden sibling, fsync them all, then rename
/// each into place. No target is touched until every file is staged.
fn swap_files(paths: &Paths, files: &BTreeMap<&'static str, Vec<u8>>) -> Result<(), CoreError> {
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());

    for (logical, bytes) in files {
        let target = paths.resolve(logical);
        let Some(name) = target.file_name() else {
            return Err(CoreError::Internal(format!("{logical} has no file name")));
        };
        let mut staged_name = std::ffi::OsString::from(".");
        staged_name.push(name);
        staged_name.push(STAGED_SUFFIX);
        let staging = target.with_file_name(staged_name);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
        }
        let written = fs::write(&staging, bytes)
            .and_then(|()| fs::File::open(&staging)?.sync_all());
        if let Err(e) = written {
            for (path, _) in &staged {
                let _ = fs::remove_file(path);
            }
            let _ = fs::remove_file(&staging);
            return Err(CoreError::io(&staging, e));
        }
        staged.push((staging, target));
    }

    for (staging, target) in &staged {
        fs::rename(staging, target).map_err(|e| CoreError::io(target, e))?;
        if let Some(parent) = target.parent() {
            sync_dir(parent)?;
        }
        debug!(path = %target.display(), "config file replaced");
    }
    Ok(())
}
