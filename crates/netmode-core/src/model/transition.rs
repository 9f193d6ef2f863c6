// ── Transition records ──
//
// `PendingTransition` is the single persisted record of the latest mode
// change. `ChangeLogEntry` is the append-only audit trail.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::mode::{ModeId, ModeParameters};
use super::snapshot::SnapshotId;

/// A validated request staged by `set_mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChangeRequest {
    pub target_mode: ModeId,
    pub parameters: ModeParameters,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransitionStatus {
    Applying,
    PendingConfirmation,
    Confirmed,
    RollingBack,
    RolledBack,
    Error,
}

impl TransitionStatus {
    /// Blocks any new transition from starting.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::RolledBack)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransition {
    pub id: Uuid,
    pub from_mode: ModeId,
    pub to_mode: ModeId,
    pub parameters: ModeParameters,
    pub snapshot_id: SnapshotId,
    pub applied_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: TransitionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RollbackReason>,
    /// Set when a rollback failed and the device needs manual recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingTransition {
    pub fn is_pending(&self) -> bool {
        self.status == TransitionStatus::PendingConfirmation
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.deadline
    }

    /// Time left in the confirmation window, `None` unless pending.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.is_pending()
            .then(|| (self.deadline - now).max(Duration::zero()))
    }
}

/// Why a transition was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RollbackReason {
    Timeout,
    Requested,
    ApplyFailed(String),
    Interrupted,
    Retry,
    Operator,
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("confirmation window expired"),
            Self::Requested => f.write_str("rollback requested"),
            Self::ApplyFailed(cause) => write!(f, "apply failed: {cause}"),
            Self::Interrupted => f.write_str("transition interrupted by process exit"),
            Self::Retry => f.write_str("rollback retried by operator"),
            Self::Operator => f.write_str("resolved manually by operator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Confirmed,
    RolledBack,
    RollbackFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub transition_id: Uuid,
    pub from_mode: ModeId,
    pub to_mode: ModeId,
    pub outcome: Outcome,
    pub reason: String,
}

impl ChangeLogEntry {
    pub fn for_transition(
        transition: &PendingTransition,
        outcome: Outcome,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: at,
            transition_id: transition.id,
            from_mode: transition.from_mode,
            to_mode: transition.to_mode,
            outcome,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pending(deadline_in: i64) -> PendingTransition {
        let now = Utc::now();
        PendingTransition {
            id: Uuid::new_v4(),
            from_mode: ModeId::Router,
            to_mode: ModeId::AccessPoint,
            parameters: ModeParameters::default(),
            snapshot_id: SnapshotId::generate(now),
            applied_at: now,
            deadline: now + Duration::seconds(deadline_in),
            status: TransitionStatus::PendingConfirmation,
            reason: None,
            error: None,
            resolved_at: None,
        }
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let t = pending(-5);
        assert_eq!(t.remaining(Utc::now()), Some(Duration::zero()));
        assert!(t.is_expired(Utc::now()));
    }

    #[test]
    fn terminal_transitions_report_no_remaining_time() {
        let mut t = pending(120);
        t.status = TransitionStatus::RolledBack;
        assert_eq!(t.remaining(Utc::now()), None);
        assert!(!t.is_expired(t.deadline + Duration::seconds(1)));
        assert!(!t.status.is_active());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(TransitionStatus::PendingConfirmation.to_string(), "pending_confirmation");
        assert_eq!(
            serde_json::to_string(&TransitionStatus::RolledBack).ok().as_deref(),
            Some("\"rolled_back\"")
        );
        assert!(TransitionStatus::Error.is_active());
    }

    #[test]
    fn reason_serializes_with_detail() {
        let json = serde_json::to_value(RollbackReason::ApplyFailed("dnsmasq".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "apply_failed", "detail": "dnsmasq"}));
        let json = serde_json::to_value(RollbackReason::Timeout).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "timeout"}));
    }
}
