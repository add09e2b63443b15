//! Routes freshly downloaded media into the month/domain tree that the
//! sync daemon watches. Classification itself (OCR over cropped frames)
//! lives outside this process, behind [`Classifier`].

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

const IMAGE_SUFFIXES: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];
const VIDEO_SUFFIXES: &[&str] = &["mp4", "avi", "mkv", "mov"];

/// The external classification collaborator: inspects a media file and
/// returns the embedded domain, if one was detected.
pub trait Classifier {
    fn classify(&self, path: &Path) -> Result<Option<String>>;
}

/// Classifier that shells out to an external command (the OCR pipeline),
/// invoked as `<cmd> <file>`. The detected domain is read from stdout;
/// empty output means no match.
pub struct CommandClassifier {
    command: String,
}

impl CommandClassifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, path: &Path) -> Result<Option<String>> {
        let output = Command::new(&self.command)
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run classifier '{}'", self.command))?;

        if !output.status.success() {
            anyhow::bail!(
                "Classifier '{}' failed on {}: {}",
                self.command,
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let domain = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        Ok(if domain.is_empty() { None } else { Some(domain) })
    }
}

/// True for the media types worth classifying.
pub fn is_media(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    IMAGE_SUFFIXES.contains(&ext.as_str()) || VIDEO_SUFFIXES.contains(&ext.as_str())
}

/// Target directory for one media file: `<dest>/<MM-YYYY>/<domain>`, or
/// `<dest>/<MM-YYYY>/others/<YYYY-MM-DD>` when nothing was detected.
pub fn route_for(dest_root: &Path, received_at: DateTime<Utc>, domain: Option<&str>) -> PathBuf {
    let month = received_at.format("%m-%Y").to_string();
    match domain {
        Some(domain) => dest_root.join(month).join(domain),
        None => dest_root
            .join(month)
            .join("others")
            .join(received_at.format("%Y-%m-%d").to_string()),
    }
}

/// Classify one file and move it into its routed directory. Returns the
/// new location, or `None` for non-media files (left where they are).
pub fn organize_file(
    dest_root: &Path,
    path: &Path,
    received_at: DateTime<Utc>,
    classifier: &dyn Classifier,
) -> Result<Option<PathBuf>> {
    if !is_media(path) {
        tracing::info!(path = %path.display(), "ignoring non-media file");
        return Ok(None);
    }

    let domain = classifier
        .classify(path)
        .with_context(|| format!("Classification failed for {}", path.display()))?;

    let target_dir = route_for(dest_root, received_at, domain.as_deref());
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid file name: {}", path.display()))?;
    let target = target_dir.join(file_name);
    move_file(path, &target)
        .with_context(|| format!("Failed to move {} to {}", path.display(), target.display()))?;

    tracing::info!(from = %path.display(), to = %target.display(), "media filed");
    Ok(Some(target))
}

/// Walk `source` recursively and organize every media file into
/// `dest_root`. Returns the number of files moved. Classification errors
/// are logged per file and do not abort the walk.
pub fn organize_tree(
    source: &Path,
    dest_root: &Path,
    classifier: &dyn Classifier,
) -> Result<usize> {
    let mut pending_dirs = vec![source.to_path_buf()];
    let mut moved = 0;

    while let Some(dir) = pending_dirs.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending_dirs.push(path);
                continue;
            }
            match organize_file(dest_root, &path, Utc::now(), classifier) {
                Ok(Some(_)) => moved += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %format!("{e:#}"), "failed to organize file");
                }
            }
        }
    }

    Ok(moved)
}

/// Move a file, falling back to copy+delete for cross-filesystem moves.
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(18 /* EXDEV */) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
