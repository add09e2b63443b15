use std::path::Path;

use anyhow::{Context, Result};

/// Compute the relative path from `base` to `full`.
/// Both paths should be absolute. Returns a forward-slash separated string
/// suitable for use as a platform-independent sync key.
pub fn relative_path(base: &Path, full: &Path) -> Result<String> {
    let rel = full
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", full.display(), base.display()))?;

    // Normalize to forward slashes (already the case on Linux, but be explicit)
    let s = rel.to_string_lossy().replace('\\', "/");
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        let base = Path::new("/home/user/media");
        let full = Path::new("/home/user/media/02-2026/example.com/photo.jpg");
        assert_eq!(
            relative_path(base, full).unwrap(),
            "02-2026/example.com/photo.jpg"
        );
    }

    #[test]
    fn test_relative_path_root() {
        let base = Path::new("/home/user/media");
        let full = Path::new("/home/user/media/photo.jpg");
        assert_eq!(relative_path(base, full).unwrap(), "photo.jpg");
    }

    #[test]
    fn test_relative_path_outside_base() {
        let base = Path::new("/home/user/media");
        let full = Path::new("/home/other/photo.jpg");
        assert!(relative_path(base, full).is_err());
    }
}
