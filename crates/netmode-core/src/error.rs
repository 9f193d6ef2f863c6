// ── Core error types ──
//
// Every failure the orchestrator can surface. Variants are grouped the
// way callers react to them: validation problems never have side effects,
// transition-state conflicts leave the persisted record untouched, and
// the apply/rollback family describes what happened to the device.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::service::ServiceError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation errors ────────────────────────────────────────────
    #[error("Unknown mode: {mode}")]
    UnknownMode { mode: String },

    #[error("Validation failed: {}", .issues.join("; "))]
    Validation { issues: Vec<String> },

    // ── Transition state errors ──────────────────────────────────────
    #[error("Another mode change is in progress ({status})")]
    ConcurrentChange { status: String },

    #[error("No mode change is pending confirmation")]
    NoPendingTransition,

    #[error("Operation '{operation}' is not allowed while {state}")]
    InvalidState { operation: String, state: String },

    #[error("The switch to {to_mode} was already rolled back ({reason}); confirming it has no effect")]
    AlreadyRolledBack { to_mode: String, reason: String },

    #[error("Confirmation window expired: the switch to {to_mode} was already rolled back")]
    ConfirmationExpired {
        to_mode: String,
        rolled_back_at: Option<DateTime<Utc>>,
    },

    // ── Apply / rollback errors ──────────────────────────────────────
    #[error("Cannot snapshot the current configuration: {reason}")]
    SnapshotFailure { reason: String },

    #[error("Applying mode {mode} failed: {cause}")]
    ApplyFailure {
        mode: String,
        cause: String,
        /// Whether the automatic rollback restored the previous state.
        rolled_back: bool,
    },

    #[error("Rollback failed, the device needs manual recovery: {reason}")]
    RollbackFailure { reason: String },

    // ── Plumbing ─────────────────────────────────────────────────────
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} did not finish within {timeout:?}")]
    IoTimeout {
        operation: String,
        timeout: std::time::Duration,
    },

    #[error("Corrupt state file {}: {message}", .path.display())]
    CorruptState { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(issue: impl Into<String>) -> Self {
        Self::Validation {
            issues: vec![issue.into()],
        }
    }

    /// Stable machine-readable code, used on the RPC surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMode { .. } => "unknown_mode",
            Self::Validation { .. } => "validation",
            Self::ConcurrentChange { .. } => "concurrent_change",
            Self::NoPendingTransition => "no_pending_transition",
            Self::InvalidState { .. } => "invalid_state",
            Self::AlreadyRolledBack { .. } => "already_rolled_back",
            Self::ConfirmationExpired { .. } => "confirmation_expired",
            Self::SnapshotFailure { .. } => "snapshot_failure",
            Self::ApplyFailure { .. } => "apply_failure",
            Self::RollbackFailure { .. } => "rollback_failure",
            Self::Service(_) => "service_error",
            Self::Io { .. } => "io_error",
            Self::IoTimeout { .. } => "io_timeout",
            Self::CorruptState { .. } => "corrupt_state",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Rejected input; nothing was touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownMode { .. } | Self::Validation { .. })
    }

    /// The device may be inconsistent and an operator has to step in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_joins_issues() {
        let err = CoreError::Validation {
            issues: vec!["lan_ipaddr: not an IPv4 address".into(), "ssid: empty".into()],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed: lan_ipaddr: not an IPv4 address; ssid: empty"
        );
        assert!(err.is_validation());
        assert!(!err.is_fatal());
    }

    #[test]
    fn rollback_failure_is_fatal() {
        let err = CoreError::RollbackFailure {
            reason: "digest mismatch".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.code(), "rollback_failure");
    }
}
