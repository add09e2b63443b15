use std::sync::Arc;
use std::time::Duration;

use super::state::SyncStateStore;
use super::RemoteStore;

/// Background task that trashes remote folders nothing has been uploaded
/// into for the configured number of days. Runs a sweep, sleeps for the
/// interval, repeats until the daemon exits.
pub struct CleanupWorker {
    store: Arc<dyn RemoteStore>,
    state: Arc<SyncStateStore>,
    stale_after: Duration,
    interval: Duration,
}

impl CleanupWorker {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        state: Arc<SyncStateStore>,
        stale_after_days: u64,
        sweep_interval_hours: u64,
    ) -> Self {
        Self {
            store,
            state,
            stale_after: Duration::from_secs(stale_after_days * 24 * 3600),
            interval: Duration::from_secs(sweep_interval_hours * 3600),
        }
    }

    pub async fn run(self) {
        loop {
            self.sweep().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One scan-and-trash cycle. Returns the number of folders trashed.
    pub async fn sweep(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let candidates = self.state.stale_folders(self.stale_after, now);
        if candidates.is_empty() {
            tracing::debug!("cleanup sweep: nothing stale");
            return 0;
        }

        tracing::info!(count = candidates.len(), "cleanup sweep: trashing stale folders");
        let mut trashed = 0;

        for folder in &candidates {
            match self.store.trash_folder_recursive(&folder.id).await {
                Ok(()) => {
                    self.state.remove_folder(&folder.parent_id, &folder.name);
                    tracing::info!(
                        folder = %folder.name,
                        id = %folder.id,
                        days = self.stale_after.as_secs() / (24 * 3600),
                        "stale folder trashed"
                    );
                    trashed += 1;
                }
                Err(e) => {
                    // record kept; picked up again on the next sweep
                    tracing::error!(
                        folder = %folder.name,
                        id = %folder.id,
                        error = %format!("{e:#}"),
                        "failed to trash stale folder"
                    );
                }
            }
        }

        if let Err(e) = self.state.flush() {
            tracing::error!(error = %e, "failed to flush state after cleanup sweep");
        }

        trashed
    }
}
