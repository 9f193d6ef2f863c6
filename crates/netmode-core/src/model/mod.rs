// ── Domain model ──

mod mode;
mod snapshot;
mod transition;

pub use mode::{Mode, ModeId, ModeParameters, ParamKind, ParamSpec, ServiceSpec};
pub use snapshot::{ManifestEntry, ServiceState, Snapshot, SnapshotId, SnapshotManifest, SnapshotSummary};
pub use transition::{
    ChangeLogEntry, ModeChangeRequest, Outcome, PendingTransition, RollbackReason,
    TransitionStatus,
};
