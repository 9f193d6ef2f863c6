// ── Rollback executor ──
//
// Restores a transition's snapshot, re-applies the captured service
// states and records the outcome. Idempotent on rolled-back transitions.
// A failed restore leaves the transition in the sticky `error` status.

use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::model::{
    ChangeLogEntry, Outcome, PendingTransition, RollbackReason, Snapshot, TransitionStatus,
};
use crate::orchestrator::Shared;
use crate::persist::{TransitionLock, offload};

/// What `execute` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackResult {
    RolledBack,
    AlreadyRolledBack,
}

pub struct RollbackExecutor<'a> {
    shared: &'a Shared,
}

impl<'a> RollbackExecutor<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    pub async fn execute(
        &self,
        transition: &mut PendingTransition,
        reason: RollbackReason,
        lock: &TransitionLock,
    ) -> Result<RollbackResult, CoreError> {
        match transition.status {
            TransitionStatus::RolledBack => return Ok(RollbackResult::AlreadyRolledBack),
            TransitionStatus::Confirmed => {
                return Err(CoreError::InvalidState {
                    operation: "rollback".into(),
                    state: "confirmed".into(),
                });
            }
            _ => {}
        }

        let state = &self.shared.state;
        warn!(
            transition = %transition.id,
            from = %transition.from_mode,
            to = %transition.to_mode,
            snapshot = %transition.snapshot_id,
            %reason,
            "rolling back"
        );
        transition.status = TransitionStatus::RollingBack;
        transition.reason = Some(reason.clone());
        state.save_transition(transition, lock)?;

        let restored = self.restore(transition).await;
        let now = self.shared.clock.now();
        transition.resolved_at = Some(now);

        match restored {
            Ok(()) => {
                transition.status = TransitionStatus::RolledBack;
                transition.error = None;
                state.save_transition(transition, lock)?;
                state.append_log(
                    &ChangeLogEntry::for_transition(
                        transition,
                        Outcome::RolledBack,
                        reason.to_string(),
                        now,
                    ),
                    lock,
                )?;
                info!(transition = %transition.id, mode = %transition.from_mode, "rollback complete");
                Ok(RollbackResult::RolledBack)
            }
            Err(cause) => {
                error!(
                    transition = %transition.id,
                    snapshot = %transition.snapshot_id,
                    cause = %cause,
                    "rollback failed, manual recovery required"
                );
                transition.status = TransitionStatus::Error;
                transition.error = Some(cause.clone());
                state.save_transition(transition, lock)?;
                state.append_log(
                    &ChangeLogEntry::for_transition(
                        transition,
                        Outcome::RollbackFailed,
                        format!("{reason}: {cause}"),
                        now,
                    ),
                    lock,
                )?;
                Err(CoreError::RollbackFailure { reason: cause })
            }
        }
    }

    async fn restore(&self, transition: &PendingTransition) -> Result<(), String> {
        let store = self.shared.snapshots.clone();
        let id = transition.snapshot_id.clone();
        let snapshot = offload("snapshot restore", self.shared.config.file_timeout, move || {
            let snapshot = store.load(&id)?;
            store.restore(&snapshot)?;
            Ok(snapshot)
        })
        .await
        .map_err(|e| e.to_string())?;
        self.restore_services(transition, &snapshot).await
    }

    /// Bring the services either mode touched back to their recorded
    /// state. The old mode's restart order goes first; every failure is
    /// collected. Services neither mode manages are left alone.
    async fn restore_services(
        &self,
        transition: &PendingTransition,
        snapshot: &Snapshot,
    ) -> Result<(), String> {
        let registry = self.shared.registry;
        let services = self.shared.services.as_ref();

        let mut order: Vec<&str> = registry
            .get(transition.from_mode)
            .affected_services
            .iter()
            .chain(registry.get(transition.to_mode).affected_services)
            .map(|s| s.name)
            .collect();
        let mut seen = Vec::new();
        order.retain(|name| {
            let first = !seen.contains(name);
            seen.push(*name);
            first
        });

        let mut failures = Vec::new();
        for name in order {
            let Some(recorded) = snapshot.service_states.get(name) else {
                continue;
            };
            let step = async {
                services.set_enabled(name, recorded.enabled).await?;
                if recorded.running {
                    services.restart(name).await
                } else {
                    services.stop(name).await
                }
            };
            if let Err(e) = step.await {
                warn!(service = name, error = %e, "service restore failed");
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("service restore failed: {}", failures.join("; ")))
        }
    }
}
