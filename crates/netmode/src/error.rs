//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use netmode_config::ConfigError;
use netmode_core::CoreError;

/// Process exit codes. Success is 0.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const TIMEOUT: i32 = 8;
    pub const ROLLBACK_FAILED: i32 = 9;
    pub const EXPIRED: i32 = 10;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Input ────────────────────────────────────────────────────────

    #[error("Unknown mode '{mode}'")]
    #[diagnostic(
        code(netmode::unknown_mode),
        help("Run: netmode modes to see the available modes")
    )]
    UnknownMode { mode: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netmode::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(netmode::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Transition state ─────────────────────────────────────────────

    #[error("Another mode change is in progress ({status})")]
    #[diagnostic(
        code(netmode::concurrent_change),
        help(
            "Finish the pending change first: netmode confirm, or netmode rollback.\n\
             Run: netmode status"
        )
    )]
    ConcurrentChange { status: String },

    #[error("No mode change is pending confirmation")]
    #[diagnostic(code(netmode::nothing_pending), help("Run: netmode status"))]
    NothingPending,

    #[error("Cannot {operation} now: {state}")]
    #[diagnostic(code(netmode::invalid_state), help("Run: netmode status"))]
    InvalidState { operation: String, state: String },

    #[error("The confirmation window closed; the switch to {to_mode} was already rolled back")]
    #[diagnostic(
        code(netmode::confirmation_expired),
        help("Nothing was re-applied. Stage and apply the mode again to retry.")
    )]
    ConfirmationExpired { to_mode: String },

    #[error("The switch to {to_mode} was already rolled back ({reason})")]
    #[diagnostic(
        code(netmode::already_rolled_back),
        help("Confirming has no effect. Stage and apply the mode again to retry.")
    )]
    AlreadyRolledBack { to_mode: String, reason: String },

    // ── Apply / rollback ─────────────────────────────────────────────

    #[error("Could not snapshot the current configuration: {reason}")]
    #[diagnostic(
        code(netmode::snapshot_failed),
        help("No configuration was changed. Check free space on the backup directory.")
    )]
    SnapshotFailed { reason: String },

    #[error("Applying {mode} failed: {cause}")]
    #[diagnostic(
        code(netmode::apply_failed),
        help("The previous configuration was restored automatically.")
    )]
    ApplyFailed { mode: String, cause: String },

    #[error("Cannot apply {mode}: {cause}")]
    #[diagnostic(
        code(netmode::apply_refused),
        help("No configuration was changed. Install the missing package and apply again.")
    )]
    ApplyRefused { mode: String, cause: String },

    #[error("Rollback failed: {reason}")]
    #[diagnostic(
        code(netmode::rollback_failed),
        severity(Error),
        help(
            "The device may be in an inconsistent state.\n\
             Retry the restore: netmode recover --retry\n\
             After fixing it by hand: netmode recover --resolve"
        )
    )]
    RollbackFailed { reason: String },

    #[error("{message}")]
    #[diagnostic(
        code(netmode::timeout),
        help("Raise services.command_timeout_secs or services.health_timeout_secs.")
    )]
    Timeout { message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(netmode::config), help("Check: netmode config show"))]
    Config(#[from] ConfigError),

    // ── Plumbing ─────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(netmode::core))]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(netmode::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownMode { .. } | Self::NothingPending => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } | Self::Json(_) => {
                exit_code::USAGE
            }
            Self::Config(ConfigError::Validation { .. } | ConfigError::Figment(_)) => {
                exit_code::USAGE
            }
            Self::ConcurrentChange { .. }
            | Self::InvalidState { .. }
            | Self::AlreadyRolledBack { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::RollbackFailed { .. } => exit_code::ROLLBACK_FAILED,
            Self::ConfirmationExpired { .. } => exit_code::EXPIRED,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownMode { mode } => CliError::UnknownMode { mode },

            CoreError::Validation { issues } => CliError::Validation {
                field: "parameters".into(),
                reason: issues.join("; "),
            },

            CoreError::ConcurrentChange { status } => CliError::ConcurrentChange { status },

            CoreError::NoPendingTransition => CliError::NothingPending,

            CoreError::InvalidState { operation, state } => {
                CliError::InvalidState { operation, state }
            }

            CoreError::AlreadyRolledBack { to_mode, reason } => {
                CliError::AlreadyRolledBack { to_mode, reason }
            }

            CoreError::ConfirmationExpired { to_mode, .. } => {
                CliError::ConfirmationExpired { to_mode }
            }

            CoreError::SnapshotFailure { reason } => CliError::SnapshotFailed { reason },

            CoreError::ApplyFailure {
                mode,
                cause,
                rolled_back: false,
            } => CliError::ApplyRefused { mode, cause },

            CoreError::ApplyFailure { mode, cause, .. } => CliError::ApplyFailed { mode, cause },

            CoreError::RollbackFailure { reason } => CliError::RollbackFailed { reason },

            CoreError::Service(e) if e.is_timeout() => CliError::Timeout {
                message: e.to_string(),
            },

            e @ CoreError::IoTimeout { .. } => CliError::Timeout {
                message: e.to_string(),
            },

            other => CliError::Core(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_documented_exit_codes() {
        let cases = [
            (CoreError::UnknownMode { mode: "mesh".into() }, exit_code::NOT_FOUND),
            (
                CoreError::Validation {
                    issues: vec!["lan_ipaddr: not an IPv4 address".into()],
                },
                exit_code::USAGE,
            ),
            (
                CoreError::ConcurrentChange {
                    status: "pending_confirmation".into(),
                },
                exit_code::CONFLICT,
            ),
            (
                CoreError::RollbackFailure {
                    reason: "digest mismatch".into(),
                },
                exit_code::ROLLBACK_FAILED,
            ),
            (
                CoreError::ConfirmationExpired {
                    to_mode: "relay".into(),
                    rolled_back_at: None,
                },
                exit_code::EXPIRED,
            ),
            (
                CoreError::AlreadyRolledBack {
                    to_mode: "bridge".into(),
                    reason: "rollback requested".into(),
                },
                exit_code::CONFLICT,
            ),
            (
                CoreError::IoTimeout {
                    operation: "snapshot".into(),
                    timeout: std::time::Duration::from_secs(30),
                },
                exit_code::TIMEOUT,
            ),
            (CoreError::Internal("boom".into()), exit_code::GENERAL),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }

    #[test]
    fn refused_apply_says_nothing_changed() {
        let err = CliError::from(CoreError::ApplyFailure {
            mode: "relay".into(),
            cause: "required service not installed: relayd".into(),
            rolled_back: false,
        });
        assert!(matches!(err, CliError::ApplyRefused { .. }), "{err}");
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }
}
