// ── Snapshot types ──

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a stored snapshot: `YYYYMMDDTHHMMSSZ-<8 hex>`.
///
/// Ids sort chronologically and double as directory names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", at.format("%Y%m%dT%H%M%SZ"), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (stamp, suffix) = value
            .split_once('-')
            .ok_or_else(|| format!("invalid snapshot id '{value}'"))?;
        let stamp_ok = stamp.len() == 16
            && chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%SZ").is_ok();
        let suffix_ok = suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit());
        if stamp_ok && suffix_ok {
            Ok(Self(value))
        } else {
            Err(format!("invalid snapshot id '{value}'"))
        }
    }
}

impl std::str::FromStr for SnapshotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub enabled: bool,
    pub running: bool,
}

/// Captured pre-change state. `None` content means the file did not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<String, Option<Vec<u8>>>,
    pub service_states: BTreeMap<String, ServiceState>,
}

/// On-disk description of a snapshot, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
    pub service_states: BTreeMap<String, ServiceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub files: usize,
    pub bytes: u64,
}

impl From<&SnapshotManifest> for SnapshotSummary {
    fn from(m: &SnapshotManifest) -> Self {
        Self {
            id: m.id.clone(),
            created_at: m.created_at,
            files: m.files.iter().filter(|f| f.present).count(),
            bytes: m.files.iter().map(|f| f.size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = SnapshotId::generate(Utc::now());
        let parsed: Result<SnapshotId, _> = id.as_str().parse();
        assert_eq!(parsed.ok(), Some(id));
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!("../etc".parse::<SnapshotId>().is_err());
        assert!("20260101T000000Z-zzzzzzzz".parse::<SnapshotId>().is_err());
        assert!("20260101T000000Z-0a1b2c3d".parse::<SnapshotId>().is_ok());
    }
}
