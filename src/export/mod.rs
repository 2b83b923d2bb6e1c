use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::Database;

/// Result of copying people's photos out of the library
#[derive(Debug, Default, Serialize)]
pub struct ExportSummary {
    pub copied: Vec<PathBuf>,
    /// Source paths that no longer exist or could not be copied
    pub skipped: Vec<String>,
}

/// Copy every photo containing a face of any of `person_ids` into `dest`.
/// Each photo is copied once even if several of the people appear in it.
/// Existing files in `dest` are never overwritten: a clash gets a `_1`, `_2`,
/// ... suffix before the extension.
pub fn export_person_photos(db: &Database, person_ids: &[i64], dest: &Path) -> Result<ExportSummary> {
    if person_ids.is_empty() {
        bail!("No people selected for export");
    }

    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create export directory {}", dest.display()))?;

    let mut summary = ExportSummary::default();

    for source in db.image_paths_for_people(person_ids)? {
        let src = Path::new(&source);
        if !src.is_file() {
            tracing::warn!(path = %source, "Export source missing");
            summary.skipped.push(source);
            continue;
        }

        let target = unique_target(dest, src);
        match fs::copy(src, &target) {
            Ok(_) => summary.copied.push(target),
            Err(e) => {
                tracing::warn!(path = %source, error = %e, "Export copy failed");
                summary.skipped.push(source);
            }
        }
    }

    tracing::info!(
        dest = %dest.display(),
        copied = summary.copied.len(),
        skipped = summary.skipped.len(),
        "Export finished"
    );

    Ok(summary)
}

/// First free name for `src`'s file name inside `dest`
fn unique_target(dest: &Path, src: &Path) -> PathBuf {
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "photo".to_string());

    let candidate = dest.join(&file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.clone());
    let ext = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dest.join(format!("{}_{}{}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
