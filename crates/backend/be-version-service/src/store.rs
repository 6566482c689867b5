//! File-backed persistence for the version snapshot and the update document

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

use crate::types::{SnapshotStatus, ToolVersionRecord, UpdateInfo, VersionSnapshot};

pub const SNAPSHOT_FILENAME: &str = "versions.json";
pub const UPDATE_INFO_FILENAME: &str = "update.json";

/// Temp files older than this are leftovers of a crashed write.
const STALE_TEMP_FILE_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("failed to save {}: {reason}", path.display())]
    Save { path: PathBuf, reason: String },
}

/// Reads and atomically replaces the two registry documents in a data
/// directory.
///
/// Loads never fail: a missing or corrupt document degrades to its fallback.
/// Each instance also remembers the newest documents it has seen so reads
/// through one instance never go backwards in time.
pub struct SnapshotStore {
    data_dir: PathBuf,
    newest_snapshot: Mutex<Option<VersionSnapshot>>,
    newest_update_info: Mutex<Option<UpdateInfo>>,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            error!(
                "Failed to create data directory {}: {}",
                data_dir.display(),
                e
            );
        }

        match be_fs::remove_stale_temp_files(&data_dir, STALE_TEMP_FILE_AGE) {
            Ok(0) => {}
            Ok(removed) => warn!(
                "Removed {} leftover temporary files from {}",
                removed,
                data_dir.display()
            ),
            Err(e) => warn!("Failed to clean up temporary files: {:#}", e),
        }

        Self {
            data_dir,
            newest_snapshot: Mutex::new(None),
            newest_update_info: Mutex::new(None),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILENAME)
    }

    pub fn update_info_path(&self) -> PathBuf {
        self.data_dir.join(UPDATE_INFO_FILENAME)
    }

    #[instrument(skip(self), fields(path = %self.snapshot_path().display()))]
    pub fn load_snapshot(&self) -> VersionSnapshot {
        let loaded = match self.try_load_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No snapshot on disk, serving fallback");
                VersionSnapshot::fallback()
            }
            Err(e) => {
                warn!("{}, serving fallback", e);
                VersionSnapshot::fallback()
            }
        };

        keep_newest(&self.newest_snapshot, loaded, |s| s.updated_at)
    }

    /// Parse the snapshot on disk without any fallback. `Ok(None)` when the
    /// file does not exist.
    pub fn try_load_snapshot(&self) -> Result<Option<VersionSnapshot>, StoreError> {
        let path = self.snapshot_path();
        be_fs::read_json_file::<StoredSnapshot>(&path)
            .map(|stored| stored.map(VersionSnapshot::from))
            .map_err(|e| StoreError::Load {
                path,
                reason: format!("{:#}", e),
            })
    }

    #[instrument(
        skip_all,
        fields(path = %self.snapshot_path().display(), tools = snapshot.tools.len())
    )]
    pub fn save_snapshot(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError> {
        let path = self.snapshot_path();
        write_document(&path, snapshot)?;
        debug!("Snapshot saved");

        let mut newest = self.newest_snapshot.lock();
        if newest
            .as_ref()
            .is_none_or(|seen| seen.updated_at <= snapshot.updated_at)
        {
            *newest = Some(snapshot.clone());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.update_info_path().display()))]
    pub fn load_update_info(&self) -> UpdateInfo {
        let path = self.update_info_path();
        let loaded = match be_fs::read_json_file::<UpdateInfo>(&path) {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!("No update document on disk, serving fallback");
                UpdateInfo::default()
            }
            Err(e) => {
                warn!("Failed to load update document: {:#}, serving fallback", e);
                UpdateInfo::default()
            }
        };

        keep_newest(&self.newest_update_info, loaded, |i| i.updated_at)
    }

    #[instrument(skip_all, fields(path = %self.update_info_path().display()))]
    pub fn save_update_info(&self, info: &UpdateInfo) -> Result<(), StoreError> {
        let path = self.update_info_path();
        write_document(&path, info)?;
        debug!("Update document saved");

        let mut newest = self.newest_update_info.lock();
        if newest
            .as_ref()
            .is_none_or(|seen| seen.updated_at <= info.updated_at)
        {
            *newest = Some(info.clone());
        }
        Ok(())
    }
}

fn write_document<T: serde::Serialize>(path: &Path, document: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(document).map_err(|e| StoreError::Save {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    be_fs::create_dirs_then_write(path, json).map_err(|e| StoreError::Save {
        path: path.to_path_buf(),
        reason: format!("{:#}", e),
    })
}

/// Return whichever of `loaded` and the remembered document is newer, and
/// remember the result.
fn keep_newest<T: Clone>(
    slot: &Mutex<Option<T>>,
    loaded: T,
    stamp: impl Fn(&T) -> Option<DateTime<Utc>>,
) -> T {
    let mut newest = slot.lock();
    match newest.as_ref() {
        Some(seen) if stamp(seen) > stamp(&loaded) => seen.clone(),
        _ => {
            *newest = Some(loaded.clone());
            loaded
        }
    }
}

/// On-disk shape of a snapshot. Every field is optional so that documents
/// written by older releases still load.
#[derive(Deserialize)]
struct StoredSnapshot {
    #[serde(default)]
    tools: Vec<StoredToolRecord>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status: SnapshotStatus,
}

/// On-disk shape of a tool record. `stale` and `mirror_is_stale` are legacy
/// names of `is_stale`.
#[derive(Deserialize)]
struct StoredToolRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    latest_version: Option<String>,
    #[serde(default)]
    last_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_check_error: Option<String>,
    #[serde(default)]
    is_stale: Option<bool>,
    #[serde(default)]
    stale: Option<bool>,
    #[serde(default)]
    mirror_is_stale: Option<bool>,
    #[serde(default)]
    last_success_at: Option<DateTime<Utc>>,
}

impl From<StoredToolRecord> for ToolVersionRecord {
    fn from(stored: StoredToolRecord) -> Self {
        let name = stored
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| stored.id.clone());

        Self {
            id: stored.id,
            name,
            latest_version: stored.latest_version.filter(|v| !v.is_empty()),
            last_check_at: stored.last_check_at,
            last_check_error: stored.last_check_error.filter(|e| !e.is_empty()),
            is_stale: [stored.is_stale, stored.stale, stored.mirror_is_stale]
                .into_iter()
                .any(|flag| flag.unwrap_or(false)),
            last_success_at: stored.last_success_at,
        }
    }
}

impl From<StoredSnapshot> for VersionSnapshot {
    fn from(stored: StoredSnapshot) -> Self {
        let mut tools: Vec<ToolVersionRecord> = Vec::with_capacity(stored.tools.len());
        for record in stored.tools {
            if tools.iter().any(|existing| existing.id == record.id) {
                warn!("Dropping duplicate tool record '{}' from snapshot", record.id);
                continue;
            }
            tools.push(record.into());
        }

        Self {
            tools,
            updated_at: stored.updated_at,
            status: stored.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn snapshot_at(updated_at: DateTime<Utc>, version: &str) -> VersionSnapshot {
        VersionSnapshot {
            tools: vec![ToolVersionRecord {
                id: "node".to_string(),
                name: "Node.js".to_string(),
                latest_version: Some(version.to_string()),
                last_check_at: Some(updated_at),
                last_check_error: None,
                is_stale: false,
                last_success_at: Some(updated_at),
            }],
            updated_at: Some(updated_at),
            status: SnapshotStatus::Ok,
        }
    }

    #[test]
    fn missing_documents_load_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        assert_eq!(store.load_snapshot(), VersionSnapshot::fallback());
        assert_eq!(store.load_update_info(), UpdateInfo::default());
        assert!(!store.load_update_info().required);
    }

    #[test]
    fn creates_missing_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");

        let store = SnapshotStore::new(&data_dir);

        assert!(data_dir.is_dir());
        assert_eq!(store.data_dir(), data_dir.as_path());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let snapshot = snapshot_at(Utc::now(), "22.1.0");

        store.save_snapshot(&snapshot).unwrap();

        assert_eq!(store.load_snapshot(), snapshot);
        // A second instance only sees the file.
        assert_eq!(SnapshotStore::new(dir.path()).load_snapshot(), snapshot);
    }

    #[test]
    fn corrupt_snapshot_loads_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(store.snapshot_path(), b"{\"tools\": [ {\"id\": ").unwrap();

        assert_eq!(store.load_snapshot(), VersionSnapshot::fallback());
        assert!(store.try_load_snapshot().is_err());
    }

    #[test]
    fn interrupted_write_leaves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let previous = snapshot_at(Utc::now(), "22.1.0");
        store.save_snapshot(&previous).unwrap();

        // What a crash between write and rename leaves behind.
        std::fs::write(
            dir.path().join(".tmp_4242__1700000000000000000__0"),
            b"{\"tools\": [{\"id\": \"node\", \"latest_ver",
        )
        .unwrap();

        let fresh = SnapshotStore::new(dir.path());
        assert_eq!(fresh.load_snapshot(), previous);
    }

    #[test]
    fn opening_store_removes_old_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join(".tmp_4242__1700000000000000000__0");
        let in_flight = dir.path().join(".tmp_4343__1700000000000000000__0");
        std::fs::write(&leftover, b"{\"tools\": [").unwrap();
        std::fs::write(&in_flight, b"{\"tools\": [").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&leftover)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3600))
            .unwrap();

        let store = SnapshotStore::new(dir.path());

        assert!(!leftover.exists());
        assert!(in_flight.exists());
        assert_eq!(store.load_snapshot(), VersionSnapshot::fallback());
    }

    #[test]
    fn legacy_stale_field_is_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        std::fs::write(
            store.snapshot_path(),
            r#"{
                "tools": [
                    {"id": "a", "name": "A", "latest_version": "1.0.0", "stale": true},
                    {"id": "b", "name": "B", "latest_version": "1.0.0", "is_stale": true},
                    {"id": "c", "name": "C", "latest_version": "1.0.0", "stale": false},
                    {"id": "d", "latest_version": "", "last_check_error": ""},
                    {"id": "e", "name": "E", "latest_version": "1.0.0", "mirror_is_stale": true}
                ],
                "updated_at": null,
                "status": "stale"
            }"#,
        )
        .unwrap();

        let snapshot = store.load_snapshot();
        assert_eq!(snapshot.status, SnapshotStatus::Stale);
        assert!(snapshot.tools[0].is_stale);
        assert_eq!(
            ToolVersionRecord {
                id: "b".to_string(),
                name: "B".to_string(),
                ..snapshot.tools[0].clone()
            },
            snapshot.tools[1]
        );
        assert!(!snapshot.tools[2].is_stale);
        assert_eq!(snapshot.tools[3].name, "d");
        assert_eq!(snapshot.tools[3].latest_version, None);
        assert_eq!(snapshot.tools[3].last_check_error, None);
        assert_eq!(
            ToolVersionRecord {
                id: "e".to_string(),
                name: "E".to_string(),
                ..snapshot.tools[0].clone()
            },
            snapshot.tools[4]
        );

        let written = serde_json::to_value(&snapshot).unwrap();
        assert!(written["tools"][0].get("stale").is_none());
        assert_eq!(written["tools"][0]["is_stale"], true);
    }

    #[test]
    fn duplicate_ids_on_disk_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(
            store.snapshot_path(),
            r#"{
                "tools": [
                    {"id": "a", "latest_version": "1"},
                    {"id": "a", "latest_version": "2"}
                ],
                "status": "ok"
            }"#,
        )
        .unwrap();

        let snapshot = store.load_snapshot();
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].latest_version.as_deref(), Some("1"));
    }

    #[test]
    fn reads_through_one_instance_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let now = Utc::now();
        let newer = snapshot_at(now, "22.2.0");
        store.save_snapshot(&newer).unwrap();

        // Another writer replaces the file with an older document.
        let other = SnapshotStore::new(dir.path());
        other
            .save_snapshot(&snapshot_at(now - Duration::minutes(5), "22.1.0"))
            .unwrap();

        assert_eq!(store.load_snapshot(), newer);
    }

    #[test]
    fn update_info_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let mut info = UpdateInfo {
            version: Some("2.3.0".to_string()),
            release_notes: Some("Bug fixes".to_string()),
            required: true,
            updated_at: Some(Utc::now()),
            ..UpdateInfo::default()
        };
        info.update.insert(
            "linux-x86_64".to_string(),
            serde_json::json!({"url": "https://example.com/app.tar.gz"}),
        );

        store.save_update_info(&info).unwrap();

        assert_eq!(SnapshotStore::new(dir.path()).load_update_info(), info);
    }

    #[test]
    fn corrupt_update_info_loads_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(store.update_info_path(), b"not json").unwrap();

        let info = store.load_update_info();
        assert_eq!(info, UpdateInfo::default());
        assert_eq!(info.version, None);
        assert!(info.update.is_empty());
    }
}
