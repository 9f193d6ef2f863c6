// ── Durable state ──

mod atomic;
mod mode_record;
mod state;

pub use atomic::JsonFile;
pub(crate) use atomic::{offload, read_optional, sync_dir, write_atomic};
pub use mode_record::{ModeRecord, ModeRecordFile};
pub use state::{StateStore, TransitionLock};
