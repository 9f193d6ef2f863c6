// ── Transition state store ──
//
// Layout under the state directory:
//   transition.json   latest PendingTransition, terminal or not
//   staged.json       ModeChangeRequest staged by set_mode
//   changelog.jsonl   append-only audit trail, one entry per line
//   .lock             advisory flock serializing writers across processes
//
// Writers must present a `TransitionLock`; readers never lock.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead as _, BufReader, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt as _;
use tracing::{debug, warn};

use super::atomic::{JsonFile, sync_dir, write_atomic};
use crate::error::CoreError;
use crate::model::{ChangeLogEntry, ModeChangeRequest, PendingTransition};

/// Exclusive writer lease. Released on drop.
#[derive(Debug)]
pub struct TransitionLock {
    file: File,
}

impl Drop for TransitionLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release transition lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    history_limit: usize,
    transition: JsonFile<PendingTransition>,
    staged: JsonFile<ModeChangeRequest>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, history_limit: usize) -> Self {
        let dir = dir.into();
        Self {
            transition: JsonFile::new(dir.join("transition.json")),
            staged: JsonFile::new(dir.join("staged.json")),
            history_limit: history_limit.max(1),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    fn changelog_path(&self) -> PathBuf {
        self.dir.join("changelog.jsonl")
    }

    /// Take the writer lock without blocking.
    pub fn lock(&self) -> Result<TransitionLock, CoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| CoreError::io(&self.dir, e))?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CoreError::io(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "transition lock acquired");
                Ok(TransitionLock { file })
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(CoreError::ConcurrentChange {
                    status: "another process holds the transition lock".into(),
                })
            }
            Err(e) => Err(CoreError::io(&path, e)),
        }
    }

    // ── Transition record ──

    pub fn transition(&self) -> Result<Option<PendingTransition>, CoreError> {
        self.transition.load()
    }

    pub fn save_transition(
        &self,
        transition: &PendingTransition,
        _lock: &TransitionLock,
    ) -> Result<(), CoreError> {
        debug!(id = %transition.id, status = %transition.status, "persisting transition");
        self.transition.save(transition)
    }

    // ── Staged request ──

    pub fn staged(&self) -> Result<Option<ModeChangeRequest>, CoreError> {
        self.staged.load()
    }

    pub fn save_staged(
        &self,
        request: &ModeChangeRequest,
        _lock: &TransitionLock,
    ) -> Result<(), CoreError> {
        self.staged.save(request)
    }

    pub fn clear_staged(&self, _lock: &TransitionLock) -> Result<(), CoreError> {
        self.staged.remove()
    }

    // ── Change log ──

    /// Append one entry, compacting the log to the history limit.
    pub fn append_log(&self, entry: &ChangeLogEntry, _lock: &TransitionLock) -> Result<(), CoreError> {
        let path = self.changelog_path();
        fs::create_dir_all(&self.dir).map_err(|e| CoreError::io(&self.dir, e))?;

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoreError::io(&path, e))?;
        file.write_all(&line).map_err(|e| CoreError::io(&path, e))?;
        file.sync_all().map_err(|e| CoreError::io(&path, e))?;
        drop(file);
        sync_dir(&self.dir)?;

        let entries = self.read_log()?;
        if entries.len() > self.history_limit {
            let keep = &entries[entries.len() - self.history_limit..];
            let mut bytes = Vec::new();
            for entry in keep {
                bytes.extend(serde_json::to_vec(entry)?);
                bytes.push(b'\n');
            }
            write_atomic(&path, &bytes)?;
            debug!(kept = keep.len(), "compacted change log");
        }
        Ok(())
    }

    /// The most recent entries, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<ChangeLogEntry>, CoreError> {
        let mut entries = self.read_log()?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Oldest first. Unreadable lines are skipped with a warning.
    fn read_log(&self) -> Result<Vec<ChangeLogEntry>, CoreError> {
        let path = self.changelog_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(&path, e)),
        };
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CoreError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping unreadable change log entry"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write as _;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::model::{ModeId, Outcome};

    fn entry(reason: &str) -> ChangeLogEntry {
        ChangeLogEntry {
            timestamp: Utc::now(),
            transition_id: Uuid::new_v4(),
            from_mode: ModeId::Router,
            to_mode: ModeId::Bridge,
            outcome: Outcome::RolledBack,
            reason: reason.to_owned(),
        }
    }

    #[test]
    fn second_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 10);
        let held = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(CoreError::ConcurrentChange { .. })));
        drop(held);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn history_is_newest_first_and_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 3);
        let lock = store.lock().unwrap();
        for i in 0..5 {
            store.append_log(&entry(&format!("r{i}")), &lock).unwrap();
        }
        let reasons: Vec<String> = store.history(10).unwrap().into_iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec!["r4", "r3", "r2"]);
        let lines = fs::read_to_string(dir.path().join("changelog.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 3);
        assert_eq!(store.history(1).unwrap().len(), 1);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 10);
        let lock = store.lock().unwrap();
        store.append_log(&entry("ok"), &lock).unwrap();
        let mut f = OpenOptions::new()
            .append(true)
            .open(dir.path().join("changelog.jsonl"))
            .unwrap();
        writeln!(f, "{{truncated").unwrap();
        assert_eq!(store.history(10).unwrap().len(), 1);
    }
}
