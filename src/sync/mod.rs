pub mod cleanup;
pub mod local_watcher;
pub mod resolver;
pub mod retry_queue;
pub mod state;
pub mod uploader;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::drive_api::{DriveClient, DriveEntry, UploadOutcome};

/// The remote store operations the sync layer depends on. `DriveClient` is
/// the production implementation; tests substitute an in-memory fake.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Non-trashed folders named `name` under `parent_id`.
    async fn list_folder(&self, parent_id: &str, name: &str) -> Result<Vec<DriveEntry>>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveEntry>;

    async fn upload_file(&self, local_path: &Path, parent_id: &str) -> Result<UploadOutcome>;

    async fn trash_item(&self, remote_id: &str) -> Result<()>;

    /// Post-order recursive trash of a folder subtree.
    async fn trash_folder_recursive(&self, remote_id: &str) -> Result<()>;
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn list_folder(&self, parent_id: &str, name: &str) -> Result<Vec<DriveEntry>> {
        DriveClient::list_folder(self, parent_id, name).await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveEntry> {
        DriveClient::create_folder(self, name, parent_id).await
    }

    async fn upload_file(&self, local_path: &Path, parent_id: &str) -> Result<UploadOutcome> {
        DriveClient::upload_file(self, local_path, parent_id).await
    }

    async fn trash_item(&self, remote_id: &str) -> Result<()> {
        DriveClient::trash_item(self, remote_id).await
    }

    async fn trash_folder_recursive(&self, remote_id: &str) -> Result<()> {
        DriveClient::trash_folder_recursive(self, remote_id).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct FakeFolder {
        pub id: String,
        pub parent_id: String,
        pub name: String,
        pub trashed: bool,
    }

    #[derive(Debug, Clone)]
    pub struct FakeUpload {
        pub parent_id: String,
        pub name: String,
    }

    /// In-memory remote store with per-operation call counters and an
    /// injectable failure budget for uploads and trash calls.
    #[derive(Default)]
    pub struct FakeStore {
        pub folders: Mutex<Vec<FakeFolder>>,
        pub uploads: Mutex<Vec<FakeUpload>>,
        pub list_calls: AtomicUsize,
        pub create_calls: AtomicUsize,
        pub upload_calls: AtomicUsize,
        pub trash_calls: AtomicUsize,
        /// The next N upload calls fail.
        pub fail_uploads: AtomicUsize,
        /// The next N recursive-trash calls fail.
        pub fail_trash: AtomicUsize,
        next_id: AtomicUsize,
    }

    impl FakeStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-seed a remote folder, as if created by another process.
        pub fn seed_folder(&self, parent_id: &str, name: &str) -> String {
            let id = self.fresh_id("seeded");
            self.folders.lock().unwrap().push(FakeFolder {
                id: id.clone(),
                parent_id: parent_id.into(),
                name: name.into(),
                trashed: false,
            });
            id
        }

        pub fn remote_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
                + self.create_calls.load(Ordering::SeqCst)
                + self.upload_calls.load(Ordering::SeqCst)
                + self.trash_calls.load(Ordering::SeqCst)
        }

        fn fresh_id(&self, prefix: &str) -> String {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{n}")
        }

        fn entry_for(folder: &FakeFolder) -> DriveEntry {
            // Round-trip through JSON keeps this honest about the wire shape.
            serde_json::from_value(serde_json::json!({
                "id": folder.id,
                "title": folder.name,
                "mimeType": crate::drive_api::types::FOLDER_MIME,
                "labels": {"trashed": folder.trashed},
            }))
            .unwrap()
        }
    }

    #[async_trait]
    impl RemoteStore for FakeStore {
        async fn list_folder(&self, parent_id: &str, name: &str) -> Result<Vec<DriveEntry>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let folders = self.folders.lock().unwrap();
            Ok(folders
                .iter()
                .filter(|f| f.parent_id == parent_id && f.name == name && !f.trashed)
                .map(Self::entry_for)
                .collect())
        }

        async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveEntry> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let folder = FakeFolder {
                id: self.fresh_id("folder"),
                parent_id: parent_id.into(),
                name: name.into(),
                trashed: false,
            };
            self.folders.lock().unwrap().push(folder.clone());
            Ok(Self::entry_for(&folder))
        }

        async fn upload_file(
            &self,
            local_path: &Path,
            parent_id: &str,
        ) -> Result<UploadOutcome> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_uploads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("injected upload failure for {}", local_path.display());
            }

            let name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let remote_id = self.fresh_id("file");
            self.uploads.lock().unwrap().push(FakeUpload {
                parent_id: parent_id.into(),
                name,
            });
            let size_bytes = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
            Ok(UploadOutcome {
                remote_id,
                size_bytes,
                elapsed_secs: 0.0,
            })
        }

        async fn trash_item(&self, remote_id: &str) -> Result<()> {
            self.trash_calls.fetch_add(1, Ordering::SeqCst);
            let mut folders = self.folders.lock().unwrap();
            if let Some(folder) = folders.iter_mut().find(|f| f.id == remote_id) {
                folder.trashed = true;
            }
            Ok(())
        }

        async fn trash_folder_recursive(&self, remote_id: &str) -> Result<()> {
            self.trash_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_trash
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("injected trash failure for {remote_id}");
            }

            let mut folders = self.folders.lock().unwrap();
            // Flat fake: trash the folder and any direct children.
            for folder in folders.iter_mut() {
                if folder.id == remote_id || folder.parent_id == remote_id {
                    folder.trashed = true;
                }
            }
            Ok(())
        }
    }
}
