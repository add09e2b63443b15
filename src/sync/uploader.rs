use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::util::path::relative_path;

use super::resolver;
use super::retry_queue::{RetryItem, RetryQueue};
use super::state::SyncStateStore;
use super::RemoteStore;

/// How far an upload got before failing: the error itself plus the last
/// remote folder that resolved successfully (the remote root if resolution
/// never advanced). The parent ID is persisted with the retry entry.
struct UploadFailure {
    parent_id: String,
    error: anyhow::Error,
}

#[derive(Debug, Clone, Copy)]
pub struct UploaderOptions {
    pub max_concurrent: usize,
    /// Retry loop sleep when the queue is empty.
    pub idle_poll: Duration,
    /// Pause between retried items, to go easy on the remote API.
    pub pause: Duration,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            idle_poll: Duration::from_secs(60),
            pause: Duration::from_secs(5),
        }
    }
}

/// Orchestrates one file's journey: folder resolution → upload → state
/// update → local deletion, with failures diverted to the retry queue.
/// Uploads run on a bounded worker pool (fixed semaphore permits).
pub struct UploadCoordinator {
    store: Arc<dyn RemoteStore>,
    state: Arc<SyncStateStore>,
    retry: Arc<RetryQueue>,
    local_root: PathBuf,
    root_folder_id: String,
    permits: Arc<Semaphore>,
    options: UploaderOptions,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        state: Arc<SyncStateStore>,
        retry: Arc<RetryQueue>,
        local_root: PathBuf,
        root_folder_id: String,
        options: UploaderOptions,
    ) -> Self {
        Self {
            store,
            state,
            retry,
            local_root,
            root_folder_id,
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            options,
        }
    }

    /// Run one file on the worker pool. Returns immediately; the task
    /// acquires a permit, so at most `max_concurrent` uploads are in
    /// flight at once.
    pub fn spawn_upload(self: Arc<Self>, path: PathBuf) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool shut down
            };
            self.submit(&path).await;
        })
    }

    /// Process one file; any failure is converted into a retry queue entry.
    /// Never propagates: a bad file must not take a worker down.
    pub async fn submit(&self, path: &Path) {
        if let Err(failure) = self.sync_file(path).await {
            tracing::error!(
                path = %path.display(),
                error = %format!("{:#}", failure.error),
                "upload failed, queueing for retry"
            );
            if let Err(e) = self
                .retry
                .push(path.to_path_buf(), failure.parent_id, 0)
            {
                tracing::error!(path = %path.display(), error = %e, "failed to persist retry entry");
            }
        }
    }

    /// Resolve, upload, record, delete, in that order.
    async fn sync_file(&self, path: &Path) -> Result<(), UploadFailure> {
        let mut parent_id = self.root_folder_id.clone();

        let key = match relative_path(&self.local_root, path) {
            Ok(key) => key,
            Err(error) => return Err(UploadFailure { parent_id, error }),
        };

        if self.state.is_file_uploaded(&key) {
            tracing::debug!(path = %key, "already uploaded, skipping");
            return Ok(());
        }

        if let Some(dir) = Path::new(&key).parent() {
            for component in dir.components() {
                let name = match component.as_os_str().to_str() {
                    Some(name) => name,
                    None => {
                        return Err(UploadFailure {
                            parent_id,
                            error: anyhow::anyhow!("Non-UTF-8 path component in {key}"),
                        })
                    }
                };
                parent_id =
                    match resolver::get_or_create_folder(&*self.store, &self.state, &parent_id, name)
                        .await
                    {
                        Ok(id) => id,
                        Err(error) => return Err(UploadFailure { parent_id, error }),
                    };
            }
        }

        let outcome = match self.store.upload_file(path, &parent_id).await {
            Ok(outcome) => outcome,
            Err(error) => return Err(UploadFailure { parent_id, error }),
        };

        self.state.mark_file_uploaded(&key);
        self.state.touch_folder(&parent_id);
        tracing::info!(
            path = %key,
            remote_id = %outcome.remote_id,
            size_mb = format!("{:.2}", outcome.size_bytes as f64 / 1_000_000.0),
            elapsed_secs = format!("{:.2}", outcome.elapsed_secs),
            "uploaded"
        );

        // The remote copy is authoritative now; a failed local delete only
        // leaves a marker-skipped leftover behind.
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %key, "local copy removed"),
            Err(e) => tracing::warn!(path = %key, error = %e, "failed to remove local copy"),
        }

        Ok(())
    }

    /// Walk the local tree and submit every file that has no uploaded
    /// marker. Waits for all submitted uploads to finish; returns how many
    /// files were submitted. Run once at startup (and for `sync-now`) to
    /// catch files that arrived while the daemon was down.
    pub async fn scan_existing(self: Arc<Self>) -> Result<usize> {
        let mut pending_dirs = vec![self.local_root.clone()];
        let mut handles = Vec::new();

        while let Some(dir) = pending_dirs.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending_dirs.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let key = match relative_path(&self.local_root, &path) {
                    Ok(key) => key,
                    Err(_) => continue,
                };
                if self.state.is_file_uploaded(&key) {
                    continue;
                }
                handles.push(self.clone().spawn_upload(path));
            }
        }

        let submitted = handles.len();
        for handle in handles {
            // a panicked worker task already logged via the panic hook
            let _ = handle.await;
        }
        Ok(submitted)
    }

    /// Long-running loop draining the retry queue: one item at a time,
    /// resubmitted through the same upload path; re-queued with an
    /// incremented count on failure until the retry budget is exhausted.
    pub async fn run_retry_loop(&self) {
        loop {
            let item = match self.retry.pop() {
                Ok(item) => item,
                Err(e) => {
                    tracing::error!(error = %e, "failed to pop retry queue");
                    None
                }
            };

            match item {
                None => tokio::time::sleep(self.options.idle_poll).await,
                Some(item) => {
                    self.process_retry_item(item).await;
                    tokio::time::sleep(self.options.pause).await;
                }
            }
        }
    }

    /// One retry attempt for a previously failed upload.
    async fn process_retry_item(&self, item: RetryItem) {
        tracing::info!(
            path = %item.local_path.display(),
            retries = item.retries,
            "retrying upload"
        );

        match self.sync_file(&item.local_path).await {
            Ok(()) => {
                tracing::info!(path = %item.local_path.display(), "retry succeeded");
            }
            Err(failure) if item.retries + 1 < self.retry.max_retries() => {
                tracing::warn!(
                    path = %item.local_path.display(),
                    retries = item.retries + 1,
                    error = %format!("{:#}", failure.error),
                    "retry failed, re-queueing"
                );
                if let Err(e) =
                    self.retry
                        .push(item.local_path.clone(), failure.parent_id, item.retries + 1)
                {
                    tracing::error!(
                        path = %item.local_path.display(),
                        error = %e,
                        "failed to persist retry entry"
                    );
                }
            }
            Err(failure) => {
                tracing::error!(
                    path = %item.local_path.display(),
                    retries = self.retry.max_retries(),
                    error = %format!("{:#}", failure.error),
                    "giving up on upload — file left in place"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use crate::sync::testing::FakeStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<FakeStore>,
        state: Arc<SyncStateStore>,
        retry: Arc<RetryQueue>,
        coordinator: Arc<UploadCoordinator>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        std::fs::create_dir_all(&root).unwrap();

        let store = Arc::new(FakeStore::new());
        let state = Arc::new(SyncStateStore::load(&dir.path().join("uploads.json")).unwrap());
        let retry = Arc::new(RetryQueue::load(&dir.path().join("retry.json"), 5).unwrap());

        let coordinator = Arc::new(UploadCoordinator::new(
            store.clone(),
            state.clone(),
            retry.clone(),
            root.clone(),
            "R".into(),
            UploaderOptions {
                max_concurrent: 2,
                idle_poll: Duration::from_millis(10),
                pause: Duration::from_millis(1),
            },
        ));

        Fixture {
            _dir: dir,
            root,
            store,
            state,
            retry,
            coordinator,
        }
    }

    fn write_file(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"media bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn nested_file_creates_chain_and_uploads() {
        let fx = fixture();
        let photo = write_file(&fx.root, "a/b/photo.jpg");

        fx.coordinator.submit(&photo).await;

        // folder records for (R, "a") and (aId, "b")
        let a_id = fx.state.resolve_folder("R", "a").expect("record for a");
        let b_id = fx.state.resolve_folder(&a_id, "b").expect("record for b");

        // uploaded into b, exactly once
        let uploads = fx.store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].parent_id, b_id);
        assert_eq!(uploads[0].name, "photo.jpg");
        drop(uploads);

        // marker written, local file deleted, nothing queued
        assert!(fx.state.is_file_uploaded("a/b/photo.jpg"));
        assert!(!photo.exists());
        assert!(fx.retry.is_empty());
    }

    #[tokio::test]
    async fn rerun_with_same_state_is_a_noop() {
        let fx = fixture();
        let photo = write_file(&fx.root, "a/b/photo.jpg");
        fx.coordinator.submit(&photo).await;
        let calls_after_first = fx.store.remote_calls();

        // same path submitted again (e.g. watcher fired after the crash
        // left a local leftover)
        let photo = write_file(&fx.root, "a/b/photo.jpg");
        fx.coordinator.submit(&photo).await;

        assert_eq!(
            fx.store.remote_calls(),
            calls_after_first,
            "marker skip must produce zero remote calls"
        );
        assert_eq!(fx.store.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_is_queued_with_resolved_parent() {
        let fx = fixture();
        let photo = write_file(&fx.root, "a/b/photo.jpg");
        fx.store.fail_uploads.store(1, Ordering::SeqCst);

        fx.coordinator.submit(&photo).await;

        let item = fx.retry.pop().unwrap().expect("item queued");
        assert_eq!(item.local_path, photo);
        assert_eq!(item.retries, 0);
        // parent is the deepest folder that resolved before the failure
        let a_id = fx.state.resolve_folder("R", "a").unwrap();
        let b_id = fx.state.resolve_folder(&a_id, "b").unwrap();
        assert_eq!(item.parent_id, b_id);

        // no marker, file left in place
        assert!(!fx.state.is_file_uploaded("a/b/photo.jpg"));
        assert!(photo.exists());
    }

    #[tokio::test]
    async fn transient_failure_then_retry_uploads_exactly_once() {
        let fx = fixture();
        let photo = write_file(&fx.root, "a/photo.jpg");
        fx.store.fail_uploads.store(1, Ordering::SeqCst);

        fx.coordinator.submit(&photo).await;
        let item = fx.retry.pop().unwrap().expect("item queued");

        fx.coordinator.process_retry_item(item).await;

        assert_eq!(fx.store.uploads.lock().unwrap().len(), 1);
        assert!(fx.state.is_file_uploaded("a/photo.jpg"));
        assert!(fx.retry.is_empty());
    }

    #[tokio::test]
    async fn retry_under_budget_is_requeued_with_incremented_count() {
        let fx = fixture();
        let photo = write_file(&fx.root, "photo.jpg");
        fx.store.fail_uploads.store(100, Ordering::SeqCst);

        // max_retries is 5: an item on its 3rd retry still has budget
        fx.coordinator
            .process_retry_item(RetryItem {
                local_path: photo.clone(),
                parent_id: "R".into(),
                retries: 3,
                last_try: 0,
            })
            .await;

        let item = fx.retry.pop().unwrap().expect("re-queued");
        assert_eq!(item.retries, 4);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_drops_the_item() {
        let fx = fixture();
        let photo = write_file(&fx.root, "photo.jpg");
        fx.store.fail_uploads.store(100, Ordering::SeqCst);

        // retries + 1 == max_retries: abandoned, not re-queued
        fx.coordinator
            .process_retry_item(RetryItem {
                local_path: photo.clone(),
                parent_id: "R".into(),
                retries: 4,
                last_try: 0,
            })
            .await;

        assert!(fx.retry.is_empty());
        // abandoned file stays local and unmarked
        assert!(photo.exists());
        assert!(!fx.state.is_file_uploaded("photo.jpg"));
    }

    #[tokio::test]
    async fn scan_submits_only_unmarked_files() {
        let fx = fixture();
        write_file(&fx.root, "a/old.jpg");
        write_file(&fx.root, "a/new.jpg");
        fx.state.mark_file_uploaded("a/old.jpg");

        let submitted = fx.coordinator.clone().scan_existing().await.unwrap();

        assert_eq!(submitted, 1);
        let uploads = fx.store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].name, "new.jpg");
    }

    #[tokio::test]
    async fn upload_failure_does_not_mark_or_delete() {
        let fx = fixture();
        let photo = write_file(&fx.root, "photo.jpg");
        fx.store.fail_uploads.store(1, Ordering::SeqCst);

        fx.coordinator.submit(&photo).await;

        assert!(photo.exists());
        assert!(!fx.state.is_file_uploaded("photo.jpg"));
        assert_eq!(fx.retry.len(), 1);
    }
}
