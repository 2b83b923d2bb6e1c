use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every file under `directory` whose extension is in `extensions`
/// (case-insensitive), sorted by path so repeated scans visit files in the
/// same order.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in WalkDir::new(directory).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if has_image_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    images.sort();

    Ok(images)
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.to_lowercase() == ext))
}
