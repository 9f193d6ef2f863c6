//! Commit-confirmed network mode switching for OpenWrt devices.
//!
//! A mode change is never final until someone confirms it from the new
//! network. If nobody does, the previous configuration comes back on its
//! own:
//!
//! - **[`Orchestrator`]**: The single writer of all persisted state.
//!   Drives the `set_mode → preview → apply → confirm | rollback` cycle and
//!   serializes mutations across processes with an advisory file lock.
//!
//! - **[`ModeRegistry`]**: The built-in mode catalog with parameter
//!   schemas, validation and default resolution.
//!
//! - **[`PreviewEngine`]**: Section-level diff between the running config
//!   and a target mode's rendered templates, plus non-blocking warnings.
//!
//! - **[`SnapshotStore`]**: Durable, checksummed copies of every managed
//!   file and service state, taken before anything is touched.
//!
//! - **[`ApplyEngine`] / [`RollbackExecutor`]**: Staged file swap and
//!   ordered service restarts, with automatic rollback on any failure.
//!
//! - **[`watchdog`]**: Enforces the persisted confirmation deadline. It
//!   holds no timer state of its own, so a reboot mid-window is harmless.
//!
//! - **[`rpc`]**: JSON method dispatch in the shape rpcd exec plugins use.

pub mod apply;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod persist;
pub mod preview;
pub mod registry;
pub mod rollback;
pub mod rpc;
pub mod service;
pub mod snapshot;
pub mod template;
pub mod uci;
pub mod watchdog;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apply::ApplyEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OrchestratorConfig, Paths};
pub use error::CoreError;
pub use orchestrator::{CurrentModeReport, Orchestrator, OrchestratorState, RollbackOutcome};
pub use preview::{Change, Preview, PreviewEngine};
pub use registry::ModeRegistry;
pub use rollback::{RollbackExecutor, RollbackResult};
pub use service::{InitdServiceManager, ServiceError, ServiceManager};
pub use snapshot::SnapshotStore;
pub use watchdog::WatchdogStatus;

pub use model::{
    ChangeLogEntry, Mode, ModeChangeRequest, ModeId, ModeParameters, Outcome, ParamKind,
    ParamSpec, PendingTransition, RollbackReason, ServiceSpec, ServiceState, Snapshot,
    SnapshotId, SnapshotSummary, TransitionStatus,
};
