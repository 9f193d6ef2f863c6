//! Atomic file writes.
//!
//! Every write goes to a temporary sibling, is fsynced, renamed over the
//! target, and then the parent directory is fsynced so the rename itself
//! survives power loss.

use std::fs::{self, File};
use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Replace `path` with `bytes` atomically, creating parent directories.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| CoreError::Internal(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;

    let tmp = temp_sibling(path)?;
    let mut file = File::create(&tmp).map_err(|e| CoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| CoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| CoreError::io(&tmp, e))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(CoreError::io(path, e));
    }
    sync_dir(parent)
}

pub(crate) fn sync_dir(dir: &Path) -> Result<(), CoreError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| CoreError::io(dir, e))
}

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Run blocking file work off the async runtime, bounded by `timeout`.
///
/// On timeout the blocking thread is left to finish on its own; callers
/// treat the operation as failed.
pub(crate) async fn offload<T, F>(operation: &str, timeout: Duration, work: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(CoreError::Internal(format!("{operation} task failed: {join}"))),
        Err(_) => Err(CoreError::IoTimeout {
            operation: operation.to_owned(),
            timeout,
        }),
    }
}

fn temp_sibling(path: &Path) -> Result<PathBuf, CoreError> {
    let name = path
        .file_name()
        .ok_or_else(|| CoreError::Internal(format!("{} has no file name", path.display())))?;
    let mut tmp = std::ffi::OsString::from(".");
    tmp.push(name);
    tmp.push(format!(".tmp-{}", std::process::id()));
    Ok(path.with_file_name(tmp))
}

/// A JSON document stored with atomic replace semantics.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or empty files load as `None`.
    pub fn load(&self) -> Result<Option<T>, CoreError> {
        let Some(bytes) = read_optional(&self.path)? else {
            return Ok(None);
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CoreError::CorruptState {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    pub fn save(&self, value: &T) -> Result<(), CoreError> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        write_atomic(&self.path, &bytes)
    }

    pub fn remove(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn offload_is_bounded_by_its_timeout() {
        let done = offload("quick write", Duration::from_secs(5), || Ok(7)).await;
        assert_eq!(done.unwrap(), 7);

        let slow = offload("slow write", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        match slow {
            Err(CoreError::IoTimeout { operation, .. }) => assert_eq!(operation, "slow write"),
            other => panic!("expected IoTimeout, got {other:?}"),
        }
    }

    #[test]
    fn json_file_roundtrip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Vec<u32>> = JsonFile::new(dir.path().join("v.json"));
        assert_eq!(file.load().unwrap(), None);
        file.save(&vec![1, 2, 3]).unwrap();
        assert_eq!(file.load().unwrap(), Some(vec![1, 2, 3]));

        fs::write(file.path(), b"{not json").unwrap();
        assert!(matches!(file.load(), Err(CoreError::CorruptState { .. })));

        file.remove().unwrap();
        file.remove().unwrap();
    }
}
