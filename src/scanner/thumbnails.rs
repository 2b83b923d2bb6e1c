use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::ThumbnailConfig;

/// Display thumbnails, cached by content fingerprint so every path holding
/// the same bytes shares one file.
pub struct ThumbnailManager {
    cache_dir: PathBuf,
    size: u32,
    quality: u8,
}

impl ThumbnailManager {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self {
            cache_dir: config.path.clone(),
            size: config.size,
            quality: config.quality,
        }
    }

    /// Reference stored in the database for this fingerprint's thumbnail
    pub fn reference(fingerprint: &str) -> String {
        format!("{}.jpg", fingerprint)
    }

    /// Absolute location of a stored thumbnail reference
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.cache_dir.join(reference)
    }

    /// Return the thumbnail reference for `fingerprint`, rendering it from
    /// the decoded `img` unless it already exists. `None` if it cannot be
    /// written.
    pub fn generate(&self, img: &DynamicImage, fingerprint: &str) -> Option<String> {
        let reference = Self::reference(fingerprint);
        let cache_path = self.resolve(&reference);

        if cache_path.exists() {
            return Some(reference);
        }

        match self.render(img, &cache_path) {
            Ok(()) => Some(reference),
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "Thumbnail generation failed");
                None
            }
        }
    }

    fn render(&self, img: &DynamicImage, cache_path: &Path) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        let rgb = if img.width() > self.size || img.height() > self.size {
            img.thumbnail(self.size, self.size).to_rgb8()
        } else {
            img.to_rgb8()
        };

        save_jpeg(&rgb, cache_path, self.quality)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Encode as JPEG next to `path` and move it into place, so a crash never
/// leaves a truncated file that later existence checks would trust.
pub(crate) fn save_jpeg(img: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let tmp_path = path.with_extension("jpg.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        JpegEncoder::new_with_quality(&mut writer, quality).encode_image(img)?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Decode an image file into pixels
pub(crate) fn load_image(path: &Path) -> Result<DynamicImage> {
    Ok(image::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};
    use tempfile::tempdir;

    fn manager(dir: &Path) -> ThumbnailManager {
        ThumbnailManager::new(&ThumbnailConfig {
            path: dir.join("thumbs"),
            size: 600,
            quality: 85,
        })
    }

    #[test]
    fn test_large_image_is_bounded() {
        let dir = tempdir().unwrap();
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(1200, 300, Rgb([200, 30, 30])));

        let thumbs = manager(dir.path());
        let reference = thumbs.generate(&source, "cafe").unwrap();
        assert_eq!(reference, "cafe.jpg");

        let thumb = image::open(thumbs.resolve(&reference)).unwrap();
        assert_eq!(thumb.dimensions(), (600, 150));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let dir = tempdir().unwrap();
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([0, 0, 0])));

        let thumbs = manager(dir.path());
        let reference = thumbs.generate(&source, "beef").unwrap();
        let thumb = image::open(thumbs.resolve(&reference)).unwrap();
        assert_eq!(thumb.dimensions(), (40, 20));
    }

    #[test]
    fn test_existing_thumbnail_is_reused() {
        let dir = tempdir().unwrap();
        let thumbs = manager(dir.path());
        fs::create_dir_all(thumbs.cache_dir()).unwrap();
        fs::write(thumbs.resolve("feed.jpg"), b"cached").unwrap();

        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])));
        let reference = thumbs.generate(&source, "feed");
        assert_eq!(reference.as_deref(), Some("feed.jpg"));
        assert_eq!(fs::read(thumbs.resolve("feed.jpg")).unwrap(), b"cached");
    }

    #[test]
    fn test_unwritable_cache_yields_none() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("thumbs");
        fs::write(&blocker, b"a file, not a directory").unwrap();

        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])));
        assert!(manager(dir.path()).generate(&source, "dead").is_none());
    }
}
