// ── Rollback watchdog ──
//
// Durable confirmation timer. Nothing is held in memory between ticks:
// every tick re-reads the persisted transition and compares its absolute
// deadline with the clock, so a restart during the window changes nothing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ModeId, PendingTransition, TransitionStatus};
use crate::orchestrator::Orchestrator;

const LOG_EVERY: Duration = Duration::from_secs(10);

/// Published on every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogStatus {
    pub transition: Option<Uuid>,
    pub status: Option<TransitionStatus>,
    pub to_mode: Option<ModeId>,
    pub remaining_secs: Option<i64>,
}

impl WatchdogStatus {
    fn of(transition: Option<&PendingTransition>, now: DateTime<Utc>) -> Self {
        transition.map_or_else(Self::default, |t| Self {
            transition: Some(t.id),
            status: Some(t.status),
            to_mode: Some(t.to_mode),
            remaining_secs: t.remaining(now).map(|d| d.num_seconds()),
        })
    }

    /// Same transition in the same status; only the countdown moved.
    fn same_phase(&self, other: &Self) -> bool {
        self.transition == other.transition && self.status == other.status
    }
}

/// What one tick should do about the persisted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing in flight.
    Idle,
    Waiting { remaining: chrono::Duration },
    /// Deadline reached: roll back.
    Expire,
    /// Left mid-apply or mid-rollback; recover once the lock is free.
    Interrupted,
    /// Rollback failed earlier; only the operator can clear it.
    Stuck,
}

pub fn decide(transition: Option<&PendingTransition>, now: DateTime<Utc>) -> Decision {
    let Some(t) = transition else {
        return Decision::Idle;
    };
    match t.status {
        TransitionStatus::PendingConfirmation if t.is_expired(now) => Decision::Expire,
        TransitionStatus::PendingConfirmation => Decision::Waiting {
            remaining: t.deadline - now,
        },
        TransitionStatus::Applying | TransitionStatus::RollingBack => Decision::Interrupted,
        TransitionStatus::Error => Decision::Stuck,
        TransitionStatus::Confirmed | TransitionStatus::RolledBack => Decision::Idle,
    }
}

/// Run one tick: act on the decision, publish the resulting status.
pub async fn check_once(orch: &Orchestrator) -> Result<WatchdogStatus, CoreError> {
    let transition = orch.transition()?;
    match decide(transition.as_ref(), orch.now()) {
        Decision::Expire | Decision::Interrupted => {
            // Skipped while another process holds the lock; an apply in
            // flight elsewhere looks interrupted from here.
            if let Some(resolved) = orch.recover().await? {
                info!(
                    transition = %resolved.id,
                    status = %resolved.status,
                    "watchdog resolved transition"
                );
            }
        }
        Decision::Waiting { .. } | Decision::Idle | Decision::Stuck => {}
    }
    let status = WatchdogStatus::of(orch.transition()?.as_ref(), orch.now());
    orch.publish(status.clone());
    Ok(status)
}

/// Daemon loop: recover, then tick until cancelled.
pub async fn run(orch: Orchestrator, cancel: CancellationToken) {
    if let Err(e) = orch.recover().await {
        error!(error = %e, "startup recovery failed");
    }

    let mut interval = tokio::time::interval(orch.config().watchdog_tick);
    interval.tick().await; // consume the immediate first tick
    let mut reporter = Reporter::default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match check_once(&orch).await {
                    Ok(status) => reporter.observe(&status),
                    Err(e) => warn!(error = %e, "watchdog tick failed"),
                }
            }
        }
    }
    debug!("watchdog stopped");
}

/// Tick until the given transition is no longer pending. Returns the
/// final record, or `None` if cancelled first.
pub async fn run_until_resolved(
    orch: &Orchestrator,
    transition: Uuid,
    cancel: &CancellationToken,
) -> Result<Option<PendingTransition>, CoreError> {
    let mut interval = tokio::time::interval(orch.config().watchdog_tick);
    let mut reporter = Reporter::default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            _ = interval.tick() => {
                let status = check_once(orch).await?;
                reporter.observe(&status);
                let current = orch.transition()?.filter(|t| t.id == transition);
                match current {
                    Some(t) if t.status.is_terminal() || t.status == TransitionStatus::Error => {
                        return Ok(Some(t));
                    }
                    Some(_) => {}
                    None => {
                        return Err(CoreError::Internal(format!(
                            "transition {transition} was replaced while waiting"
                        )));
                    }
                }
            }
        }
    }
}

// ── Reporting cadence ────────────────────────────────────────────────

#[derive(Default)]
struct Reporter {
    last: Option<WatchdogStatus>,
    logged_at: Option<Instant>,
}

impl Reporter {
    fn observe(&mut self, status: &WatchdogStatus) {
        let changed = self.last.as_ref().is_none_or(|last| !last.same_phase(status));
        let due = self.logged_at.is_none_or(|at| at.elapsed() >= LOG_EVERY);
        if changed || (due && status.remaining_secs.is_some()) {
            match status.status {
                Some(TransitionStatus::Error) => error!(
                    transition = ?status.transition,
                    "rollback failed earlier, operator recovery required"
                ),
                Some(state) => info!(
                    transition = ?status.transition,
                    status = %state,
                    mode = ?status.to_mode,
                    remaining_secs = ?status.remaining_secs,
                    "watchdog"
                ),
                None if changed => debug!("watchdog idle"),
                None => {}
            }
            self.logged_at = Some(Instant::now());
        }
        self.last = Some(status.clone());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{ModeParameters, SnapshotId};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn transition(status: TransitionStatus) -> PendingTransition {
        PendingTransition {
            id: Uuid::new_v4(),
            from_mode: ModeId::Router,
            to_mode: ModeId::AccessPoint,
            parameters: ModeParameters::default(),
            snapshot_id: SnapshotId::generate(at(0)),
            applied_at: at(0),
            deadline: at(120),
            status,
            reason: None,
            error: None,
            resolved_at: None,
        }
    }

    #[test]
    fn waits_inside_the_window() {
        let t = transition(TransitionStatus::PendingConfirmation);
        assert_eq!(
            decide(Some(&t), at(100)),
            Decision::Waiting {
                remaining: chrono::Duration::seconds(20)
            }
        );
    }

    #[test]
    fn expires_at_the_deadline() {
        let t = transition(TransitionStatus::PendingConfirmation);
        assert_eq!(decide(Some(&t), at(120)), Decision::Expire);
        assert_eq!(decide(Some(&t), at(86_400)), Decision::Expire);
    }

    #[test]
    fn interrupted_and_stuck_states() {
        for status in [TransitionStatus::Applying, TransitionStatus::RollingBack] {
            assert_eq!(decide(Some(&transition(status)), at(1)), Decision::Interrupted);
        }
        assert_eq!(
            decide(Some(&transition(TransitionStatus::Error)), at(500)),
            Decision::Stuck
        );
    }

    #[test]
    fn terminal_or_absent_is_idle() {
        assert_eq!(decide(None, at(0)), Decision::Idle);
        for status in [TransitionStatus::Confirmed, TransitionStatus::RolledBack] {
            assert_eq!(decide(Some(&transition(status)), at(500)), Decision::Idle);
        }
    }

    #[test]
    fn status_reports_remaining_seconds() {
        let t = transition(TransitionStatus::PendingConfirmation);
        let status = WatchdogStatus::of(Some(&t), at(90));
        assert_eq!(status.remaining_secs, Some(30));
        assert_eq!(status.to_mode, Some(ModeId::AccessPoint));
        assert!(status.same_phase(&WatchdogStatus::of(Some(&t), at(100))));
    }
}
