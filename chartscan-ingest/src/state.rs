//! Persisted run state
//!
//! Three JSON documents under `<downloads_dir>/scan_state/`, each read and
//! written whole. Writes land in a sibling temp file that is then renamed
//! over the target.

use crate::model::{ChartGroup, Snapshot};
use chartscan_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "drive_snapshot.json";
pub const TO_SCAN_FILE: &str = "versions_to_scan.json";
pub const TO_REMOVE_FILE: &str = "versions_to_remove.json";

/// Reduced group shape for the removal list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub root_id: String,
    pub source_name: String,
    pub group_id: String,
    pub folder_name: String,
    pub folder_id: String,
    pub is_archive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl From<&ChartGroup> for GroupRecord {
    fn from(group: &ChartGroup) -> Self {
        Self {
            root_id: group.source.root_id.clone(),
            source_name: group.source.display_name.clone(),
            group_id: group.group_id.clone(),
            folder_name: group.folder_name.clone(),
            folder_id: group.folder_id.clone(),
            is_archive: group.is_archive,
            local_path: group.local_path.clone(),
        }
    }
}

/// Reads and writes the state documents in one directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// The persisted snapshot; empty on first run
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let path = self.path_of(SNAPSHOT_FILE);
        if !path.exists() {
            tracing::info!(path = %path.display(), "No persisted snapshot; starting empty");
            return Ok(Snapshot::new());
        }
        read_json(&path)
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.write_json(SNAPSHOT_FILE, snapshot)?;
        tracing::debug!(groups = snapshot.len(), "Snapshot persisted");
        Ok(())
    }

    pub fn save_to_scan(&self, groups: &[ChartGroup]) -> Result<()> {
        self.write_json(TO_SCAN_FILE, groups)
    }

    pub fn load_to_scan(&self) -> Result<Vec<ChartGroup>> {
        read_json(&self.path_of(TO_SCAN_FILE))
    }

    pub fn save_to_remove(&self, groups: &[ChartGroup]) -> Result<()> {
        let records: Vec<GroupRecord> = groups.iter().map(GroupRecord::from).collect();
        self.write_json(TO_REMOVE_FILE, &records)
    }

    pub fn load_to_remove(&self) -> Result<Vec<GroupRecord>> {
        read_json(&self.path_of(TO_REMOVE_FILE))
    }

    fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_of(file_name);
        let temp = self.path_of(&format!("{}.tmp", file_name));

        let json = serde_json::to_vec_pretty(value)?;
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target).map_err(|e| {
            let _ = fs::remove_file(&temp);
            Error::Io(e)
        })?;
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| {
        Error::InvalidInput(format!("Malformed state file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RemoteFile, SourceRoot};
    use tempfile::TempDir;

    fn group(id: &str, local: Option<&str>) -> ChartGroup {
        ChartGroup {
            group_id: id.to_string(),
            source: SourceRoot {
                root_id: "root".to_string(),
                display_name: "Root".to_string(),
                is_single_file_source: false,
                required_icon: None,
            },
            folder_name: "Folder".to_string(),
            folder_id: "folder".to_string(),
            is_archive: true,
            members: vec![RemoteFile {
                id: "f".to_string(),
                name: "Song.zip".to_string(),
                size_bytes: 1,
                content_hash: Some(id.to_string()),
                modified_time: None,
            }],
            local_path: local.map(PathBuf::from),
        }
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("scan_state"));
        assert!(store.load_snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_persists_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("scan_state"));
        let snapshot: Snapshot = vec![group("g1", Some("/dl/g1"))].into_iter().collect();

        store.save_snapshot(&snapshot).unwrap();

        assert_eq!(store.load_snapshot().unwrap(), snapshot);
        assert!(!store.path_of("drive_snapshot.json.tmp").exists());
    }

    #[test]
    fn test_malformed_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.path_of(SNAPSHOT_FILE), b"{ not json").unwrap();

        assert!(matches!(store.load_snapshot(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_removal_list_uses_reduced_shape() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());

        store.save_to_remove(&[group("g1", Some("/dl/g1"))]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path_of(TO_REMOVE_FILE)).unwrap()).unwrap();
        assert!(raw[0].get("members").is_none());
        assert_eq!(raw[0]["groupId"], "g1");

        let records = store.load_to_remove().unwrap();
        assert_eq!(records[0].local_path, Some(PathBuf::from("/dl/g1")));
    }

    #[test]
    fn test_to_scan_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let groups = vec![group("g1", Some("/dl/g1")), group("g2", Some("/dl/g2"))];

        store.save_to_scan(&groups).unwrap();

        assert_eq!(store.load_to_scan().unwrap(), groups);
    }
}
