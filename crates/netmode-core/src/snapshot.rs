// ── Snapshot store ──
//
// Layout: <backup_dir>/<id>/manifest.json and <backup_dir>/<id>/files/<path>.
// A snapshot is assembled in `.partial-<id>`, fsynced, then renamed into
// place, so a visible snapshot directory is always complete.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Paths;
use crate::error::CoreError;
use crate::model::{
    ManifestEntry, ServiceState, Snapshot, SnapshotId, SnapshotManifest, SnapshotSummary,
};
use crate::persist::{JsonFile, read_optional, sync_dir, write_atomic};

const MANIFEST_VERSION: u32 = 1;
const PARTIAL_PREFIX: &str = ".partial-";

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn relative(logical: &str) -> &str {
    logical.trim_start_matches('/')
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    paths: Paths,
}

impl SnapshotStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            dir: paths.backup_dir(),
            paths: paths.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_dir(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    fn manifest(&self, id: &SnapshotId) -> JsonFile<SnapshotManifest> {
        JsonFile::new(self.snapshot_dir(id).join("manifest.json"))
    }

    /// Read the current content of each logical path.
    pub fn read_current(
        &self,
        logical_paths: &[&str],
    ) -> Result<BTreeMap<String, Option<Vec<u8>>>, CoreError> {
        logical_paths
            .iter()
            .map(|p| Ok(((*p).to_owned(), read_optional(&self.paths.resolve(p))?)))
            .collect()
    }

    /// Capture `logical_paths` and `service_states` durably.
    ///
    /// Returns only after every file, the manifest and the containing
    /// directories are fsynced.
    pub fn create(
        &self,
        logical_paths: &[&str],
        service_states: BTreeMap<String, ServiceState>,
        at: DateTime<Utc>,
    ) -> Result<Snapshot, CoreError> {
        let files = self
            .read_current(logical_paths)
            .map_err(|e| CoreError::SnapshotFailure {
                reason: e.to_string(),
            })?;
        let snapshot = Snapshot {
            id: SnapshotId::generate(at),
            created_at: at,
            files,
            service_states,
        };

        let partial = self.dir.join(format!("{PARTIAL_PREFIX}{}", snapshot.id));
        if let Err(e) = self.persist(&snapshot, &partial) {
            let _ = fs::remove_dir_all(&partial);
            return Err(CoreError::SnapshotFailure {
                reason: e.to_string(),
            });
        }
        info!(snapshot = %snapshot.id, files = snapshot.files.len(), "snapshot created");
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &Snapshot, partial: &Path) -> Result<(), CoreError> {
        let files_dir = partial.join("files");
        fs::create_dir_all(&files_dir).map_err(|e| CoreError::io(&files_dir, e))?;

        let mut entries = Vec::with_capacity(snapshot.files.len());
        for (logical, content) in &snapshot.files {
            let entry = match content {
                Some(bytes) => {
                    write_atomic(&files_dir.join(relative(logical)), bytes)?;
                    ManifestEntry {
                        path: logical.clone(),
                        present: true,
                        sha256: Some(digest(bytes)),
                        size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
                    }
                }
                None => ManifestEntry {
                    path: logical.clone(),
                    present: false,
                    sha256: None,
                    size: 0,
                },
            };
            entries.push(entry);
        }

        let manifest = SnapshotManifest {
            version: MANIFEST_VERSION,
            id: snapshot.id.clone(),
            created_at: snapshot.created_at,
            files: entries,
            service_states: snapshot.service_states.clone(),
        };
        JsonFile::new(partial.join("manifest.json")).save(&manifest)?;
        sync_dir(&files_dir)?;
        sync_dir(partial)?;

        let target = self.snapshot_dir(&snapshot.id);
        fs::rename(partial, &target).map_err(|e| CoreError::io(&target, e))?;
        sync_dir(&self.dir)
    }

    /// Load a snapshot and verify every file against its manifest digest.
    pub fn load(&self, id: &SnapshotId) -> Result<Snapshot, CoreError> {
        let manifest_file = self.manifest(id);
        let manifest = manifest_file.load()?.ok_or_else(|| CoreError::CorruptState {
            path: manifest_file.path().to_path_buf(),
            message: "snapshot manifest is missing".into(),
        })?;

        let files_dir = self.snapshot_dir(id).join("files");
        let mut files = BTreeMap::new();
        for entry in &manifest.files {
            let content = if entry.present {
                let path = files_dir.join(relative(&entry.path));
                let bytes = fs::read(&path).map_err(|e| CoreError::io(&path, e))?;
                if entry.sha256.as_deref() != Some(digest(&bytes).as_str()) {
                    return Err(CoreError::CorruptState {
                        path,
                        message: "content does not match the recorded digest".into(),
                    });
                }
                Some(bytes)
            } else {
                None
            };
            files.insert(entry.path.clone(), content);
        }

        Ok(Snapshot {
            id: manifest.id,
            created_at: manifest.created_at,
            files,
            service_states: manifest.service_states,
        })
    }

    /// Write every captured file back verbatim. Files that did not exist
    /// at capture time are removed.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        for (logical, content) in &snapshot.files {
            let target = self.paths.resolve(logical);
            match content {
                Some(bytes) => write_atomic(&target, bytes)?,
                None => match fs::remove_file(&target) {
                    Ok(()) => {
                        if let Some(parent) = target.parent() {
                            sync_dir(parent)?;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CoreError::io(&target, e)),
                },
            }
            debug!(path = %logical, present = content.is_some(), "restored file");
        }
        info!(snapshot = %snapshot.id, "snapshot restored");
        Ok(())
    }

    /// Stored snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>, CoreError> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(&self.dir, e)),
        };

        let mut out = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| CoreError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(id) = name.parse::<SnapshotId>() else {
                continue;
            };
            match self.manifest(&id).load() {
                Ok(Some(manifest)) => out.push(SnapshotSummary::from(&manifest)),
                Ok(None) => warn!(snapshot = %id, "snapshot without manifest"),
                Err(e) => warn!(snapshot = %id, error = %e, "unreadable snapshot manifest"),
            }
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    pub fn remove(&self, id: &SnapshotId) -> Result<(), CoreError> {
        let dir = self.snapshot_dir(id);
        fs::remove_dir_all(&dir).map_err(|e| CoreError::io(&dir, e))?;
        sync_dir(&self.dir)
    }

    /// Keep the `retain` newest snapshots that are younger than `max_age`
    /// (zero disables the age bound). `protect` is never removed. Stale
    /// partial directories are always cleaned up.
    pub fn gc(
        &self,
        retain: usize,
        max_age: Duration,
        protect: Option<&SnapshotId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SnapshotId>, CoreError> {
        self.remove_partials();

        let max_age = (!max_age.is_zero())
            .then(|| chrono::Duration::from_std(max_age).ok())
            .flatten();
        let mut removed = Vec::new();
        for (idx, summary) in self.list()?.into_iter().enumerate() {
            if protect == Some(&summary.id) {
                continue;
            }
            let too_old = max_age.is_some_and(|age| now - summary.created_at > age);
            if idx >= retain || too_old {
                self.remove(&summary.id)?;
                debug!(snapshot = %summary.id, too_old, "snapshot removed");
                removed.push(summary.id);
            }
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), retain, "snapshot gc");
        }
        Ok(removed)
    }

    fn remove_partials(&self) {
        let Ok(read) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read.filter_map(Result::ok) {
            if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "cannot remove partial snapshot");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PATHS: &[&str] = &["/etc/config/network", "/etc/config/wireless"];

    fn setup() -> (tempfile::TempDir, SnapshotStore, Paths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::under(dir.path());
        let store = SnapshotStore::new(&paths);
        fs::create_dir_all(paths.resolve("/etc/config")).unwrap();
        fs::write(paths.resolve("/etc/config/network"), b"config interface 'lan'\n").unwrap();
        (dir, store, paths)
    }

    #[test]
    fn restore_is_byte_identical_and_removes_new_files() {
        let (_dir, store, paths) = setup();
        let mut states = BTreeMap::new();
        states.insert("network".to_owned(), ServiceState { enabled: true, running: true });
        let snap = store.create(PATHS, states, Utc::now()).unwrap();

        fs::write(paths.resolve("/etc/config/network"), b"changed").unwrap();
        fs::write(paths.resolve("/etc/config/wireless"), b"new file").unwrap();

        let loaded = store.load(&snap.id).unwrap();
        assert_eq!(loaded, snap);
        store.restore(&loaded).unwrap();

        assert_eq!(
            fs::read(paths.resolve("/etc/config/network")).unwrap(),
            b"config interface 'lan'\n"
        );
        assert!(!paths.resolve("/etc/config/wireless").exists());
    }

    #[test]
    fn tampered_snapshot_fails_verification() {
        let (_dir, store, _paths) = setup();
        let snap = store.create(PATHS, BTreeMap::new(), Utc::now()).unwrap();
        let stored = store
            .dir()
            .join(snap.id.as_str())
            .join("files/etc/config/network");
        fs::write(stored, b"tampered").unwrap();
        assert!(matches!(store.load(&snap.id), Err(CoreError::CorruptState { .. })));
    }

    #[test]
    fn gc_keeps_newest_and_protected() {
        let (_dir, store, _paths) = setup();
        let base = Utc::now();
        let ids: Vec<SnapshotId> = (0..4)
            .map(|i| {
                store
                    .create(PATHS, BTreeMap::new(), base + chrono::Duration::seconds(i))
                    .unwrap()
                    .id
            })
            .collect();
        fs::create_dir_all(store.dir().join(".partial-junk")).unwrap();

        let removed = store.gc(1, Duration::ZERO, Some(&ids[0]), base).unwrap();
        assert_eq!(removed.len(), 2);
        let left: Vec<SnapshotId> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(left, vec![ids[3].clone(), ids[0].clone()]);
        assert!(!store.dir().join(".partial-junk").exists());
    }

    #[test]
    fn gc_honours_max_age() {
        let (_dir, store, _paths) = setup();
        let old = Utc::now() - chrono::Duration::days(40);
        store.create(PATHS, BTreeMap::new(), old).unwrap();
        let fresh = store.create(PATHS, BTreeMap::new(), Utc::now()).unwrap();

        let removed = store
            .gc(5, Duration::from_secs(30 * 24 * 3600), None, Utc::now())
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().unwrap()[0].id, fresh.id);
    }
}
