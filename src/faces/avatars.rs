use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::FaceConfig;
use crate::db::FaceBox;
use crate::scanner::thumbnails::{load_image, save_jpeg};

/// Writes square per-face thumbnails
pub struct FaceAssetWriter {
    dir: PathBuf,
    size: u32,
    quality: u8,
    margin: f32,
}

impl FaceAssetWriter {
    pub fn new(config: &FaceConfig) -> Self {
        Self {
            dir: config.avatar_path.clone(),
            size: config.avatar_size,
            quality: config.avatar_quality,
            margin: config.crop_margin,
        }
    }

    /// Deterministic, and distinct for every face of one image
    pub fn reference(fingerprint: &str, index: usize) -> String {
        format!("{}_face_{}.jpg", fingerprint, index)
    }

    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.dir.join(reference)
    }

    /// Decode `path` and write the thumbnail for one face of it.
    /// `None` if the image cannot be decoded or the crop cannot be saved.
    pub fn crop_face(&self, path: &Path, bbox: &FaceBox, fingerprint: &str, index: usize) -> Option<String> {
        match load_image(path) {
            Ok(img) => self.write_face(&img, bbox, fingerprint, index),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot decode image for face crop");
                None
            }
        }
    }

    /// Same as [`crop_face`](Self::crop_face) for an already decoded image
    pub fn write_face(&self, img: &DynamicImage, bbox: &FaceBox, fingerprint: &str, index: usize) -> Option<String> {
        let reference = Self::reference(fingerprint, index);
        match self.render(img, bbox, &self.resolve(&reference)) {
            Ok(()) => Some(reference),
            Err(e) => {
                tracing::warn!(fingerprint, index, error = %e, "Face thumbnail failed");
                None
            }
        }
    }

    fn render(&self, img: &DynamicImage, bbox: &FaceBox, target: &Path) -> Result<()> {
        if target.exists() {
            return Ok(());
        }

        let (x, y, w, h) = crop_region(bbox, img.width(), img.height(), self.margin)
            .ok_or_else(|| anyhow!("Face box {:?} lies outside the image", bbox))?;

        fs::create_dir_all(&self.dir)?;
        let face = img
            .crop_imm(x, y, w, h)
            .resize_exact(self.size, self.size, FilterType::Lanczos3);

        save_jpeg(&face.to_rgb8(), target, self.quality)
    }
}

/// Square region of side `margin * max(box width, box height)` centred on the
/// box, pushed inside the top/left edges and cut at the right/bottom edges.
/// Returns `(x, y, width, height)`, or `None` when nothing of it is inside.
pub fn crop_region(bbox: &FaceBox, img_width: u32, img_height: u32, margin: f32) -> Option<(u32, u32, u32, u32)> {
    let (cx, cy) = bbox.center();
    let side = ((bbox.width().max(bbox.height()) as f32 * margin) as i64).max(1);

    let left = (cx as i64 - side / 2).max(0);
    let top = (cy as i64 - side / 2).max(0);
    let right = (left + side).min(img_width as i64);
    let bottom = (top + side).min(img_height as i64);

    if right <= left || bottom <= top {
        return None;
    }

    Some((left as u32, top as u32, (right - left) as u32, (bottom - top) as u32))
}
