use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One failed upload awaiting resubmission. `parent_id` is the last remote
/// folder that resolved successfully before the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryItem {
    pub local_path: PathBuf,
    pub parent_id: String,
    pub retries: u32,
    pub last_try: i64,
}

/// Durable FIFO of failed uploads, persisted as a JSON array and rewritten
/// on every add and pop.
pub struct RetryQueue {
    path: PathBuf,
    max_retries: u32,
    queue: Mutex<VecDeque<RetryItem>>,
}

impl RetryQueue {
    /// Read the queue document, or start empty if it does not exist yet.
    /// A present-but-unparsable document is a startup error, same as the
    /// state file.
    pub fn load(path: &Path, max_retries: u32) -> Result<Self> {
        let queue = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read retry queue: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse retry queue: {}", path.display()))?
        } else {
            VecDeque::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            max_retries,
            queue: Mutex::new(queue),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RetryItem>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a failed upload with the given retry count and persist.
    pub fn push(&self, local_path: PathBuf, parent_id: String, retries: u32) -> Result<()> {
        let mut queue = self.lock();
        queue.push_back(RetryItem {
            local_path,
            parent_id,
            retries,
            last_try: chrono::Utc::now().timestamp(),
        });
        self.save(&queue)
    }

    /// Remove and return the oldest item, persisting the shrunk queue.
    /// `None` if the queue is empty.
    pub fn pop(&self) -> Result<Option<RetryItem>> {
        let mut queue = self.lock();
        let item = queue.pop_front();
        if item.is_some() {
            self.save(&queue)?;
        }
        Ok(item)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn save(&self, queue: &VecDeque<RetryItem>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(queue)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write retry queue: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to save retry queue: {}", self.path.display()))?;

        Ok(())
    }
}
