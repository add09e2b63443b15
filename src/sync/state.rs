use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One synchronized remote folder, keyed by (parent ID, name) in the
/// surrounding map. `last_upload` is epoch seconds of the last upload into
/// it (or of its registration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    pub last_upload: i64,
}

/// A stale-folder candidate returned by [`SyncStateStore::stale_folders`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleFolder {
    pub parent_id: String,
    pub name: String,
    pub id: String,
}

/// The persisted aggregate. File markers live flattened at the top level
/// next to `uploaded_dirs`, mirroring the on-disk document:
/// `{"uploaded_dirs": {...}, "02-2026/site/a.jpg": true, ...}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncState {
    #[serde(default)]
    uploaded_dirs: HashMap<String, HashMap<String, FolderRecord>>,
    #[serde(flatten)]
    uploaded_files: HashMap<String, bool>,
}

/// The single authoritative view of what has been synchronized.
///
/// All operations are atomic with respect to each other; the durable write
/// in [`flush`](Self::flush) happens while the lock is held, so flushes
/// never interleave with mutations or with each other.
pub struct SyncStateStore {
    path: PathBuf,
    state: Mutex<SyncState>,
}

impl SyncStateStore {
    /// Read the state document, or start empty if it does not exist yet.
    /// A present-but-unparsable document is an error: refusing to start is
    /// better than silently re-uploading (or re-trashing) everything.
    pub fn load(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?
        } else {
            SyncState::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // A panic while holding the lock leaves the state usable; take it anyway.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pure local lookup of a registered folder. No network I/O.
    pub fn resolve_folder(&self, parent_id: &str, name: &str) -> Option<String> {
        self.lock()
            .uploaded_dirs
            .get(parent_id)
            .and_then(|children| children.get(name))
            .map(|record| record.id.clone())
    }

    /// Insert or overwrite a folder record with `last_upload = now`.
    pub fn register_folder(&self, parent_id: &str, name: &str, remote_id: &str) {
        self.register_folder_at(parent_id, name, remote_id, now_epoch());
    }

    pub(crate) fn register_folder_at(
        &self,
        parent_id: &str,
        name: &str,
        remote_id: &str,
        last_upload: i64,
    ) {
        self.lock()
            .uploaded_dirs
            .entry(parent_id.to_string())
            .or_default()
            .insert(
                name.to_string(),
                FolderRecord {
                    id: remote_id.to_string(),
                    last_upload,
                },
            );
    }

    pub fn mark_file_uploaded(&self, key: &str) {
        self.lock().uploaded_files.insert(key.to_string(), true);
    }

    pub fn is_file_uploaded(&self, key: &str) -> bool {
        self.lock().uploaded_files.get(key).copied().unwrap_or(false)
    }

    /// Update `last_upload` of the folder with this remote ID to now.
    /// Records are keyed by (parent, name), so this is a linear scan;
    /// a no-op if the ID is not registered.
    pub fn touch_folder(&self, remote_id: &str) {
        let now = now_epoch();
        let mut state = self.lock();
        for children in state.uploaded_dirs.values_mut() {
            for record in children.values_mut() {
                if record.id == remote_id {
                    record.last_upload = now;
                    return;
                }
            }
        }
    }

    /// Folders whose last upload is at least `threshold` ago (inclusive).
    pub fn stale_folders(&self, threshold: Duration, now: i64) -> Vec<StaleFolder> {
        let threshold_secs = threshold.as_secs() as i64;
        let state = self.lock();
        let mut stale = Vec::new();
        for (parent_id, children) in &state.uploaded_dirs {
            for (name, record) in children {
                if now - record.last_upload >= threshold_secs {
                    stale.push(StaleFolder {
                        parent_id: parent_id.clone(),
                        name: name.clone(),
                        id: record.id.clone(),
                    });
                }
            }
        }
        stale
    }

    pub fn remove_folder(&self, parent_id: &str, name: &str) {
        let mut state = self.lock();
        if let Some(children) = state.uploaded_dirs.get_mut(parent_id) {
            children.remove(name);
            if children.is_empty() {
                state.uploaded_dirs.remove(parent_id);
            }
        }
    }

    pub fn folder_count(&self) -> usize {
        self.lock().uploaded_dirs.values().map(HashMap::len).sum()
    }

    pub fn file_count(&self) -> usize {
        self.lock().uploaded_files.len()
    }

    /// Serialize the aggregate and rewrite the document wholesale
    /// (tmp file → rename).
    pub fn flush(&self) -> Result<()> {
        let state = self.lock();
        let json = serde_json::to_string(&*state)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to save state file: {}", self.path.display()))?;

        Ok(())
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SyncStateStore {
        SyncStateStore::load(&dir.path().join("uploads.json")).unwrap()
    }

    #[test]
    fn register_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.resolve_folder("root", "a"), None);
        store.register_folder("root", "a", "id-a");
        assert_eq!(store.resolve_folder("root", "a"), Some("id-a".into()));
        // same name under a different parent is a different record
        assert_eq!(store.resolve_folder("other", "a"), None);
    }

    #[test]
    fn register_overwrites_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_folder("root", "a", "id-1");
        store.register_folder("root", "a", "id-2");
        assert_eq!(store.resolve_folder("root", "a"), Some("id-2".into()));
        assert_eq!(store.folder_count(), 1);
    }

    #[test]
    fn file_markers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(!store.is_file_uploaded("a/photo.jpg"));
        store.mark_file_uploaded("a/photo.jpg");
        assert!(store.is_file_uploaded("a/photo.jpg"));
        assert_eq!(store.file_count(), 1);
    }

    #[test]
    fn touch_updates_last_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_folder_at("root", "a", "id-a", 1000);
        store.touch_folder("id-a");

        // freshly touched folder is not stale even at a zero threshold … but
        // a record last touched at epoch 1000 would be
        let now = now_epoch();
        assert!(store.stale_folders(Duration::from_secs(3600), now).is_empty());
    }

    #[test]
    fn touch_unknown_id_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.register_folder_at("root", "a", "id-a", 1000);
        store.touch_folder("no-such-id");
        assert_eq!(
            store.stale_folders(Duration::from_secs(0), 1000).len(),
            1,
            "existing record must be untouched"
        );
    }

    #[test]
    fn stale_threshold_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let threshold = Duration::from_secs(15 * 24 * 3600);
        let now = 2_000_000_000;

        // exactly at the threshold: candidate
        store.register_folder_at("root", "old", "id-old", now - threshold.as_secs() as i64);
        // one second newer: not a candidate
        store.register_folder_at("root", "new", "id-new", now - threshold.as_secs() as i64 + 1);

        let stale = store.stale_folders(threshold, now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name, "old");
        assert_eq!(stale[0].id, "id-old");
        assert_eq!(stale[0].parent_id, "root");
    }

    #[test]
    fn remove_folder_drops_record_and_empty_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.register_folder("root", "a", "id-a");
        store.remove_folder("root", "a");
        assert_eq!(store.resolve_folder("root", "a"), None);
        assert_eq!(store.folder_count(), 0);
    }

    #[test]
    fn flush_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.json");

        let store = SyncStateStore::load(&path).unwrap();
        store.register_folder_at("root", "a", "id-a", 1234);
        store.mark_file_uploaded("a/photo.jpg");
        store.flush().unwrap();

        let reloaded = SyncStateStore::load(&path).unwrap();
        assert_eq!(reloaded.resolve_folder("root", "a"), Some("id-a".into()));
        assert!(reloaded.is_file_uploaded("a/photo.jpg"));
    }

    #[test]
    fn document_shape_matches_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.json");

        let store = SyncStateStore::load(&path).unwrap();
        store.register_folder_at("root", "a", "id-a", 1234);
        store.mark_file_uploaded("a/photo.jpg");
        store.flush().unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["uploaded_dirs"]["root"]["a"]["id"], "id-a");
        assert_eq!(doc["uploaded_dirs"]["root"]["a"]["last_upload"], 1234);
        // file markers are flattened to the top level
        assert_eq!(doc["a/photo.jpg"], true);
    }

    #[test]
    fn corrupt_state_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncStateStore::load(&path).is_err());
    }
}
