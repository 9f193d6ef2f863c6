// ── Orchestrator ──
//
// The commit-confirmed state machine behind the RPC surface. All
// persisted state (current-mode record, transition, staged request,
// change log) is read and written only through here.
//
//   IDLE → PREVIEWING → APPLYING → PENDING_CONFIRMATION → CONFIRMED → IDLE
//                          │                 └──────→ ROLLING_BACK → IDLE
//                          └────── failure ─────────→ ROLLING_BACK
//
// Mutating operations take the cross-process transition lock without
// blocking; queries never lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::ApplyEngine;
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::error::CoreError;
use crate::model::{
    ChangeLogEntry, Mode, ModeChangeRequest, ModeId, Outcome, PendingTransition, RollbackReason,
    SnapshotId, SnapshotSummary, TransitionStatus,
};
use crate::persist::{ModeRecord, ModeRecordFile, StateStore, TransitionLock};
use crate::preview::{Preview, PreviewEngine};
use crate::registry::ModeRegistry;
use crate::rollback::{RollbackExecutor, RollbackResult};
use crate::service::{InitdServiceManager, ServiceManager};
use crate::snapshot::SnapshotStore;
use crate::watchdog::{self, WatchdogStatus};

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Previewing,
    Applying,
    PendingConfirmation,
    RollingBack,
    /// A rollback failed; only operator recovery leaves this state.
    Error,
}

/// Answer to `get_current_mode`.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentModeReport {
    pub current_mode: ModeId,
    pub mode_name: &'static str,
    pub description: &'static str,
    pub last_change: Option<DateTime<Utc>>,
    pub state: OrchestratorState,
    pub rollback_active: bool,
    /// Whole seconds left in the confirmation window.
    pub rollback_remaining: i64,
    pub staged: Option<ModeChangeRequest>,
    pub transition: Option<PendingTransition>,
}

/// Outcome of an explicit rollback request.
#[derive(Debug, Clone)]
pub enum RollbackOutcome {
    RolledBack(PendingTransition),
    /// The transition was already rolled back; nothing was done.
    AlreadyRolledBack(PendingTransition),
}

impl RollbackOutcome {
    pub fn transition(&self) -> &PendingTransition {
        match self {
            Self::RolledBack(t) | Self::AlreadyRolledBack(t) => t,
        }
    }
}

// ── Shared internals ─────────────────────────────────────────────────

pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: ModeRegistry,
    pub(crate) state: StateStore,
    pub(crate) record: ModeRecordFile,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) services: Arc<dyn ServiceManager>,
    pub(crate) clock: Arc<dyn Clock>,
}

struct OrchestratorInner {
    shared: Shared,
    watchdog_status: watch::Sender<WatchdogStatus>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.inner.shared.config.paths.root)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Production wiring: init.d services and the system clock.
    pub fn open(config: OrchestratorConfig) -> Self {
        let services = Arc::new(InitdServiceManager::new(
            config.paths.init_dir(),
            config.command_timeout,
        ));
        Self::with_parts(config, services, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: OrchestratorConfig,
        services: Arc<dyn ServiceManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (watchdog_status, _) = watch::channel(WatchdogStatus::default());
        let shared = Shared {
            state: StateStore::new(config.paths.state_dir(), config.history_limit),
            record: ModeRecordFile::new(config.paths.mode_config()),
            snapshots: SnapshotStore::new(&config.paths),
            registry: ModeRegistry,
            services,
            clock,
            config,
        };
        Self {
            inner: Arc::new(OrchestratorInner {
                shared,
                watchdog_status,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.shared.config
    }

    pub fn registry(&self) -> ModeRegistry {
        self.inner.shared.registry
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.shared.clock.now()
    }

    // ── Queries (never lock) ─────────────────────────────────────────

    pub fn available_modes(&self) -> &'static [&'static Mode] {
        self.registry().list()
    }

    pub fn transition(&self) -> Result<Option<PendingTransition>, CoreError> {
        self.shared().state.transition()
    }

    pub fn state(&self) -> Result<OrchestratorState, CoreError> {
        let shared = self.shared();
        let state = match shared.state.transition()?.map(|t| t.status) {
            Some(TransitionStatus::Applying) => OrchestratorState::Applying,
            Some(TransitionStatus::PendingConfirmation) => OrchestratorState::PendingConfirmation,
            Some(TransitionStatus::RollingBack) => OrchestratorState::RollingBack,
            Some(TransitionStatus::Error) => OrchestratorState::Error,
            _ if shared.state.staged()?.is_some() => OrchestratorState::Previewing,
            _ => OrchestratorState::Idle,
        };
        Ok(state)
    }

    pub fn current_mode(&self) -> Result<CurrentModeReport, CoreError> {
        let shared = self.shared();
        let record = shared.record.load()?;
        let mode = shared.registry.get(record.current_mode);
        let transition = shared.state.transition()?;
        let remaining = transition
            .as_ref()
            .and_then(|t| t.remaining(shared.clock.now()));
        Ok(CurrentModeReport {
            current_mode: mode.id,
            mode_name: mode.display_name,
            description: mode.description,
            last_change: record.last_change,
            state: self.state()?,
            rollback_active: remaining.is_some(),
            rollback_remaining: remaining.map_or(0, |d| d.num_seconds()),
            staged: shared.state.staged()?,
            transition,
        })
    }

    pub fn staged(&self) -> Result<Option<ModeChangeRequest>, CoreError> {
        self.shared().state.staged()
    }

    pub fn history(&self, limit: usize) -> Result<Vec<ChangeLogEntry>, CoreError> {
        self.shared().state.history(limit)
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotSummary>, CoreError> {
        self.shared().snapshots.list()
    }

    /// Validate a parameter map against a mode without staging anything.
    pub fn validate_config(
        &self,
        mode: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, CoreError> {
        let registry = self.registry();
        let mode = registry.lookup(mode)?;
        Ok(registry.validate(mode, config))
    }

    /// Preview the staged request.
    pub async fn preview_changes(&self) -> Result<Preview, CoreError> {
        let shared = self.shared();
        let staged = shared.state.staged()?.ok_or_else(|| CoreError::InvalidState {
            operation: "preview_changes".into(),
            state: "no mode is staged (call set_mode first)".into(),
        })?;
        let from = shared.registry.get(shared.record.load()?.current_mode);
        let to = shared.registry.get(staged.target_mode);
        PreviewEngine::new(&shared.snapshots, shared.services.as_ref())
            .preview(from, to, &staged.parameters)
            .await
    }

    /// Preview an arbitrary mode without staging it.
    pub async fn preview_mode(
        &self,
        mode: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Preview, CoreError> {
        let shared = self.shared();
        let to = shared.registry.lookup(mode)?;
        let params = shared
            .registry
            .resolve(to, &shared.record.settings(to.id)?, overrides)?;
        let from = shared.registry.get(shared.record.load()?.current_mode);
        PreviewEngine::new(&shared.snapshots, shared.services.as_ref())
            .preview(from, to, &params)
            .await
    }

    // ── Mutations ────────────────────────────────────────────────────

    fn lock(&self) -> Result<TransitionLock, CoreError> {
        self.shared().state.lock()
    }

    fn ensure_idle(&self) -> Result<(), CoreError> {
        match self.shared().state.transition()? {
            Some(t) if t.status.is_active() => Err(CoreError::ConcurrentChange {
                status: t.status.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Validate and stage a mode change. Network config is not touched.
    pub async fn set_mode(
        &self,
        mode: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ModeChangeRequest, CoreError> {
        let shared = self.shared();
        let target = shared.registry.lookup(mode)?;

        let lock = self.lock()?;
        self.recover_locked(&lock).await?;
        self.ensure_idle()?;

        let parameters = shared
            .registry
            .resolve(target, &shared.record.settings(target.id)?, overrides)?;
        let request = ModeChangeRequest {
            target_mode: target.id,
            parameters,
            requested_at: shared.clock.now(),
        };
        shared.state.save_staged(&request, &lock)?;
        info!(mode = %target.id, "mode staged");
        Ok(request)
    }

    /// Discard the staged request.
    pub async fn cancel(&self) -> Result<bool, CoreError> {
        let lock = self.lock()?;
        self.recover_locked(&lock).await?;
        self.ensure_idle()?;
        let had = self.shared().state.staged()?.is_some();
        self.shared().state.clear_staged(&lock)?;
        if had {
            info!("staged mode discarded");
        }
        Ok(had)
    }

    /// Apply the staged request and open the confirmation window.
    pub async fn apply_mode(&self) -> Result<PendingTransition, CoreError> {
        let shared = self.shared();
        let lock = self.lock()?;
        self.recover_locked(&lock).await?;
        self.ensure_idle()?;

        let request = shared.state.staged()?.ok_or_else(|| CoreError::InvalidState {
            operation: "apply_mode".into(),
            state: "no mode is staged (call set_mode first)".into(),
        })?;
        let transition = ApplyEngine::new(shared).apply(&request, &lock).await?;
        shared.state.clear_staged(&lock)?;
        Ok(transition)
    }

    /// Finalize the pending transition.
    ///
    /// The persisted deadline is authoritative: confirming after it has
    /// passed rolls back and reports `ConfirmationExpired`.
    pub async fn confirm_mode(&self) -> Result<PendingTransition, CoreError> {
        let shared = self.shared();
        let lock = self.lock()?;
        let mut transition = shared
            .state
            .transition()?
            .ok_or(CoreError::NoPendingTransition)?;

        match transition.status {
            TransitionStatus::PendingConfirmation => {}
            TransitionStatus::RolledBack => return Err(already_rolled_back(&transition)),
            TransitionStatus::Confirmed => return Err(CoreError::NoPendingTransition),
            other => {
                return Err(CoreError::InvalidState {
                    operation: "confirm_mode".into(),
                    state: other.to_string(),
                });
            }
        }

        let now = shared.clock.now();
        if transition.is_expired(now) {
            info!(transition = %transition.id, "confirmation arrived after the deadline");
            RollbackExecutor::new(shared)
                .execute(&mut transition, RollbackReason::Timeout, &lock)
                .await?;
            return Err(already_rolled_back(&transition));
        }

        transition.status = TransitionStatus::Confirmed;
        transition.resolved_at = Some(now);
        shared.state.save_transition(&transition, &lock)?;
        shared.state.append_log(
            &ChangeLogEntry::for_transition(&transition, Outcome::Confirmed, "confirmed", now),
            &lock,
        )?;
        info!(transition = %transition.id, mode = %transition.to_mode, "mode confirmed");

        let config = &shared.config;
        if let Err(e) = shared
            .snapshots
            .gc(config.snapshot_retain, config.snapshot_max_age, None, now)
        {
            warn!(error = %e, "snapshot gc after confirmation failed");
        }
        Ok(transition)
    }

    /// Roll the pending transition back now. A second call on the same
    /// transition is a no-op.
    pub async fn rollback(&self) -> Result<RollbackOutcome, CoreError> {
        let shared = self.shared();
        let lock = self.lock()?;
        let mut transition = shared
            .state
            .transition()?
            .ok_or(CoreError::NoPendingTransition)?;

        match transition.status {
            TransitionStatus::PendingConfirmation => {}
            TransitionStatus::RolledBack => return Ok(RollbackOutcome::AlreadyRolledBack(transition)),
            TransitionStatus::Confirmed => return Err(CoreError::NoPendingTransition),
            other => {
                return Err(CoreError::InvalidState {
                    operation: "rollback".into(),
                    state: other.to_string(),
                });
            }
        }

        let reason = if transition.is_expired(shared.clock.now()) {
            RollbackReason::Timeout
        } else {
            RollbackReason::Requested
        };
        match RollbackExecutor::new(shared)
            .execute(&mut transition, reason, &lock)
            .await?
        {
            RollbackResult::RolledBack => Ok(RollbackOutcome::RolledBack(transition)),
            RollbackResult::AlreadyRolledBack => Ok(RollbackOutcome::AlreadyRolledBack(transition)),
        }
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// Startup recovery. Skipped when another process holds the lock.
    pub async fn recover(&self) -> Result<Option<PendingTransition>, CoreError> {
        let lock = match self.lock() {
            Ok(lock) => lock,
            Err(CoreError::ConcurrentChange { .. }) => {
                debug!("transition lock busy, skipping recovery");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.recover_locked(&lock).await
    }

    /// Resolve expired or interrupted transitions. Sticky errors are left
    /// for the operator.
    pub(crate) async fn recover_locked(
        &self,
        lock: &TransitionLock,
    ) -> Result<Option<PendingTransition>, CoreError> {
        let shared = self.shared();
        let Some(mut transition) = shared.state.transition()? else {
            return Ok(None);
        };
        let reason = match transition.status {
            TransitionStatus::PendingConfirmation if transition.is_expired(shared.clock.now()) => {
                RollbackReason::Timeout
            }
            TransitionStatus::Applying | TransitionStatus::RollingBack => RollbackReason::Interrupted,
            _ => return Ok(None),
        };
        info!(transition = %transition.id, status = %transition.status, %reason, "recovering");
        RollbackExecutor::new(shared)
            .execute(&mut transition, reason, lock)
            .await?;
        Ok(Some(transition))
    }

    /// `recover --retry`: re-attempt the failed restore once.
    pub async fn retry_rollback(&self) -> Result<PendingTransition, CoreError> {
        let shared = self.shared();
        let lock = self.lock()?;
        let mut transition = self.errored()?;
        RollbackExecutor::new(shared)
            .execute(&mut transition, RollbackReason::Retry, &lock)
            .await?;
        Ok(transition)
    }

    /// `recover --resolve`: the operator restored the device by hand.
    pub async fn resolve_manually(&self) -> Result<PendingTransition, CoreError> {
        let shared = self.shared();
        let lock = self.lock()?;
        let mut transition = self.errored()?;
        let now = shared.clock.now();

        transition.status = TransitionStatus::RolledBack;
        transition.reason = Some(RollbackReason::Operator);
        transition.resolved_at = Some(now);
        shared.state.save_transition(&transition, &lock)?;
        shared.record.store(
            &ModeRecord {
                current_mode: transition.from_mode,
                last_change: Some(now),
            },
            &lock,
        )?;
        shared.state.append_log(
            &ChangeLogEntry::for_transition(
                &transition,
                Outcome::RolledBack,
                RollbackReason::Operator.to_string(),
                now,
            ),
            &lock,
        )?;
        warn!(transition = %transition.id, "error state resolved manually");
        Ok(transition)
    }

    fn errored(&self) -> Result<PendingTransition, CoreError> {
        match self.shared().state.transition()? {
            Some(t) if t.status == TransitionStatus::Error => Ok(t),
            Some(t) => Err(CoreError::InvalidState {
                operation: "recover".into(),
                state: t.status.to_string(),
            }),
            None => Err(CoreError::NoPendingTransition),
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Remove old snapshots, always keeping the one an active transition
    /// depends on.
    pub fn gc(&self, retain: usize) -> Result<Vec<SnapshotId>, CoreError> {
        let shared = self.shared();
        let _lock = self.lock()?;
        let protect = shared
            .state
            .transition()?
            .filter(|t| t.status.is_active())
            .map(|t| t.snapshot_id);
        shared.snapshots.gc(
            retain,
            shared.config.snapshot_max_age,
            protect.as_ref(),
            shared.clock.now(),
        )
    }

    // ── Watchdog ─────────────────────────────────────────────────────

    /// Observe remaining confirmation time as published by the watchdog.
    pub fn watchdog_status(&self) -> watch::Receiver<WatchdogStatus> {
        self.inner.watchdog_status.subscribe()
    }

    pub(crate) fn publish(&self, status: WatchdogStatus) {
        self.inner.watchdog_status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Spawn the watchdog as a background task.
    pub async fn start_watchdog(&self) {
        let orch = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            watchdog::run(orch, cancel).await;
        });
        self.inner.task_handles.lock().await.push(handle);
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("orchestrator shut down");
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }
}

fn already_rolled_back(transition: &PendingTransition) -> CoreError {
    match transition.reason {
        Some(RollbackReason::Timeout) => CoreError::ConfirmationExpired {
            to_mode: transition.to_mode.to_string(),
            rolled_back_at: transition.resolved_at,
        },
        _ => CoreError::AlreadyRolledBack {
            to_mode: transition.to_mode.to_string(),
            reason: transition
                .reason
                .as_ref()
                .map_or_else(|| "no reason recorded".to_owned(), ToString::to_string),
        },
    }
}
