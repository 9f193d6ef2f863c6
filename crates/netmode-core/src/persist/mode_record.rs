// ── Current-mode record ──
//
// `/etc/config/network-modes` holds the active mode in its
// `config network-modes 'config'` section, next to per-mode settings in
// `config mode '<id>'` sections. Only the orchestrator writes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::atomic::{read_optional, write_atomic};
use super::state::TransitionLock;
use crate::error::CoreError;
use crate::model::ModeId;
use crate::uci::{UciDocument, UciSection, UciValue};

const SECTION_KIND: &str = "network-modes";
const SECTION_NAME: &str = "config";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRecord {
    pub current_mode: ModeId,
    pub last_change: Option<DateTime<Utc>>,
}

impl Default for ModeRecord {
    fn default() -> Self {
        Self {
            current_mode: ModeId::Router,
            last_change: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModeRecordFile {
    path: PathBuf,
}

impl ModeRecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document(&self) -> Result<UciDocument, CoreError> {
        let Some(bytes) = read_optional(&self.path)? else {
            return Ok(UciDocument::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        UciDocument::parse(&text).map_err(|e| CoreError::CorruptState {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// A missing file or section means a factory-default router.
    pub fn load(&self) -> Result<ModeRecord, CoreError> {
        let doc = self.document()?;
        let Some(section) = doc.section(SECTION_KIND, SECTION_NAME) else {
            return Ok(ModeRecord::default());
        };
        let current_mode = match section.get_str("current_mode") {
            None | Some("") => ModeId::Router,
            Some(raw) => raw.parse().map_err(|_| CoreError::CorruptState {
                path: self.path.clone(),
                message: format!("unknown current_mode '{raw}'"),
            })?,
        };
        let last_change = section
            .get_str("last_change")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(ModeRecord {
            current_mode,
            last_change,
        })
    }

    /// Per-mode settings from `config mode '<id>'`. List options are
    /// joined with spaces.
    pub fn settings(&self, mode: ModeId) -> Result<BTreeMap<String, String>, CoreError> {
        let doc = self.document()?;
        let Some(section) = doc.section("mode", mode.as_ref()) else {
            return Ok(BTreeMap::new());
        };
        Ok(section
            .options
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    UciValue::Single(s) => s.clone(),
                    UciValue::List(items) => items.join(" "),
                };
                (k.clone(), value)
            })
            .collect())
    }

    /// Rewrite the record section, keeping every other section.
    pub fn store(&self, record: &ModeRecord, _lock: &TransitionLock) -> Result<(), CoreError> {
        let mut doc = self.document()?;
        if doc.section(SECTION_KIND, SECTION_NAME).is_none() {
            doc.sections.insert(
                0,
                UciSection::named(SECTION_KIND, SECTION_NAME).opt("backup_config", "1"),
            );
        }
        if let Some(section) = doc.section_mut(SECTION_KIND, SECTION_NAME) {
            section.set("current_mode", UciValue::Single(record.current_mode.to_string()));
            match record.last_change {
                Some(at) => section.set("last_change", UciValue::Single(at.to_rfc3339())),
                None => section.remove("last_change"),
            }
        }
        write_atomic(&self.path, doc.render().as_bytes())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::persist::StateStore;

    const EXISTING: &str = "\
config network-modes 'config'
\toption backup_config '1'
\toption current_mode 'router'

config mode 'accesspoint'
\toption name 'Access Point'
\toption wifi_txpower '12'
";

    #[test]
    fn missing_file_defaults_to_router() {
        let dir = tempfile::tempdir().unwrap();
        let file = ModeRecordFile::new(dir.path().join("network-modes"));
        assert_eq!(file.load().unwrap(), ModeRecord::default());
        assert!(file.settings(ModeId::Relay).unwrap().is_empty());
    }

    #[test]
    fn store_keeps_mode_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network-modes");
        std::fs::write(&path, EXISTING).unwrap();
        let file = ModeRecordFile::new(&path);
        let store = StateStore::new(dir.path().join("state"), 10);
        let lock = store.lock().unwrap();

        let at = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = ModeRecord {
            current_mode: ModeId::AccessPoint,
            last_change: Some(at),
        };
        file.store(&record, &lock).unwrap();

        assert_eq!(file.load().unwrap(), record);
        assert_eq!(
            file.settings(ModeId::AccessPoint).unwrap().get("wifi_txpower").map(String::as_str),
            Some("12")
        );
    }

    #[test]
    fn unknown_mode_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network-modes");
        std::fs::write(&path, "config network-modes 'config'\n\toption current_mode 'mesh'\n").unwrap();
        assert!(matches!(
            ModeRecordFile::new(&path).load(),
            Err(CoreError::CorruptState { .. })
        ));
    }
}
