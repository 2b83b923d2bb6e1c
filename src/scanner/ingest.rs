//! One file's worth of work: fingerprint, dedup check, date and thumbnail,
//! face extraction, and the store writes, committed as one unit.

use anyhow::Result;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;

use super::hashing::fingerprint_file;
use super::metadata::{derive_date, format_timestamp};
use super::thumbnails::{load_image, ThumbnailManager};
use crate::config::Config;
use crate::db::{Database, NewImage};
use crate::faces::{DetectedFace, FaceAssetWriter, FaceExtractor};

/// What happened to one file during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// New content, stored with its faces (possibly none)
    Registered { image_id: i64, faces: usize },
    /// New content whose pixels could not be decoded or analysed. The image
    /// is stored without faces and is not revisited on later scans.
    RegisteredWithoutFaces { image_id: i64, reason: String },
    /// Content already in the store, from this path or another
    Duplicate,
    /// New content at a path that already holds a registered image
    PathAlreadyRegistered,
    /// The file could not be read at all; nothing was stored
    Unreadable { reason: String },
}

pub struct Ingestor {
    thumbnails: ThumbnailManager,
    avatars: FaceAssetWriter,
    extractor: Arc<dyn FaceExtractor>,
}

impl Ingestor {
    pub fn new(config: &Config, extractor: Arc<dyn FaceExtractor>) -> Self {
        Self {
            thumbnails: ThumbnailManager::new(&config.thumbnails),
            avatars: FaceAssetWriter::new(&config.faces),
            extractor,
        }
    }

    /// Process one file. `Err` only for store failures; everything wrong with
    /// the file itself is reported through the outcome.
    pub fn ingest(&self, db: &Database, path: &Path) -> Result<FileOutcome> {
        let fingerprint = match fingerprint_file(path) {
            Ok(fp) => fp,
            Err(e) => {
                return Ok(FileOutcome::Unreadable {
                    reason: format!("{:#}", e),
                })
            }
        };

        if db.is_known_fingerprint(&fingerprint)? {
            return Ok(FileOutcome::Duplicate);
        }
        if db.image_id_for_path(path)?.is_some() {
            return Ok(FileOutcome::PathAlreadyRegistered);
        }

        let (captured_at, source) = derive_date(path);
        tracing::debug!(path = %path.display(), ?source, "Capture time derived");

        // Decoding and detection run before the transaction so the write
        // lock is held briefly
        let decoded = load_image(path).map_err(|e| format!("Cannot decode image: {:#}", e));
        let thumbnail_ref = match &decoded {
            Ok(img) => self.thumbnails.generate(img, &fingerprint),
            Err(_) => None,
        };
        let analysis = decoded.and_then(|img| self.analyse(img));

        let tx = db.transaction()?;
        let image_id = db.insert_image(&NewImage {
            path,
            fingerprint: &fingerprint,
            captured_at: &format_timestamp(&captured_at),
            thumbnail_ref: thumbnail_ref.as_deref(),
        })?;

        let outcome = match analysis {
            Ok((img, detected)) => {
                for (index, face) in detected.iter().enumerate() {
                    let avatar = self.avatars.write_face(&img, &face.bbox, &fingerprint, index);
                    db.insert_face(image_id, &face.bbox, &face.embedding, avatar.as_deref())?;
                }
                FileOutcome::Registered {
                    image_id,
                    faces: detected.len(),
                }
            }
            Err(reason) => FileOutcome::RegisteredWithoutFaces { image_id, reason },
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn analyse(&self, img: DynamicImage) -> std::result::Result<(DynamicImage, Vec<DetectedFace>), String> {
        let detected = self
            .extractor
            .extract(&img)
            .map_err(|e| format!("Face extraction failed: {:#}", e))?;
        Ok((img, detected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FaceBox;
    use anyhow::bail;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    struct OneFace;

    impl FaceExtractor for OneFace {
        fn extract(&self, _: &DynamicImage) -> Result<Vec<DetectedFace>> {
            Ok(vec![DetectedFace {
                bbox: FaceBox { top: 4, right: 20, bottom: 20, left: 4 },
                embedding: vec![0.25, 0.5],
            }])
        }
    }

    struct Broken;

    impl FaceExtractor for Broken {
        fn extract(&self, _: &DynamicImage) -> Result<Vec<DetectedFace>> {
            bail!("model missing")
        }
    }

    fn setup(extractor: Arc<dyn FaceExtractor>) -> (tempfile::TempDir, Config, Database, Ingestor) {
        let dir = tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let db = Database::open(&config.db_path).unwrap();
        db.initialize().unwrap();
        let ingestor = Ingestor::new(&config, extractor);
        (dir, config, db, ingestor)
    }

    fn write_png(path: &Path, shade: u8) {
        RgbImage::from_pixel(32, 32, Rgb([shade, 0, 0])).save(path).unwrap();
    }

    #[test]
    fn test_new_image_is_registered_with_assets() {
        let (dir, config, db, ingestor) = setup(Arc::new(OneFace));
        let path = dir.path().join("one.png");
        write_png(&path, 10);

        let outcome = ingestor.ingest(&db, &path).unwrap();
        let FileOutcome::Registered { image_id, faces } = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(faces, 1);

        let image = db.get_image(image_id).unwrap().unwrap();
        let thumb = image.thumbnail_ref.unwrap();
        assert!(config.thumbnails.path.join(&thumb).exists());

        let stored = db.faces_for_image(image_id).unwrap();
        assert_eq!(stored[0].embedding, vec![0.25, 0.5]);
        let avatar = stored[0].thumbnail_ref.clone().unwrap();
        assert!(avatar.ends_with("_face_0.jpg"));
        assert!(config.faces.avatar_path.join(avatar).exists());

        assert_eq!(ingestor.ingest(&db, &path).unwrap(), FileOutcome::Duplicate);
    }

    #[test]
    fn test_extractor_failure_keeps_image() {
        let (dir, _config, db, ingestor) = setup(Arc::new(Broken));
        let path = dir.path().join("one.png");
        write_png(&path, 10);

        let outcome = ingestor.ingest(&db, &path).unwrap();
        assert!(matches!(outcome, FileOutcome::RegisteredWithoutFaces { .. }));
        assert_eq!(db.count_images().unwrap(), 1);
        assert_eq!(db.count_faces().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_image_keeps_row_without_thumbnail() {
        let (dir, _config, db, ingestor) = setup(Arc::new(OneFace));
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        let FileOutcome::RegisteredWithoutFaces { image_id, .. } = ingestor.ingest(&db, &path).unwrap() else {
            panic!("corrupt file should be registered without faces");
        };
        assert!(db.get_image(image_id).unwrap().unwrap().thumbnail_ref.is_none());
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let (dir, _config, db, ingestor) = setup(Arc::new(OneFace));
        let outcome = ingestor.ingest(&db, &dir.path().join("gone.png")).unwrap();
        assert!(matches!(outcome, FileOutcome::Unreadable { .. }));
        assert_eq!(db.count_images().unwrap(), 0);
    }

    #[test]
    fn test_edited_file_at_known_path_is_not_reregistered() {
        let (dir, _config, db, ingestor) = setup(Arc::new(OneFace));
        let path = dir.path().join("one.png");
        write_png(&path, 10);
        ingestor.ingest(&db, &path).unwrap();

        write_png(&path, 200);
        assert_eq!(ingestor.ingest(&db, &path).unwrap(), FileOutcome::PathAlreadyRegistered);
        assert_eq!(db.count_images().unwrap(), 1);
    }

    #[test]
    fn test_store_error_rolls_back_the_image() {
        let (dir, _config, db, ingestor) = setup(Arc::new(OneFace));
        let path = dir.path().join("one.png");
        write_png(&path, 10);

        db.conn
            .execute_batch(
                "CREATE TRIGGER refuse_faces BEFORE INSERT ON faces
                 BEGIN SELECT RAISE(ABORT, 'faces are read-only'); END;",
            )
            .unwrap();
        assert!(ingestor.ingest(&db, &path).is_err());
        assert_eq!(db.count_images().unwrap(), 0);
        assert_eq!(db.count_faces().unwrap(), 0);

        db.conn.execute_batch("DROP TRIGGER refuse_faces;").unwrap();
        let outcome = ingestor.ingest(&db, &path).unwrap();
        assert!(matches!(outcome, FileOutcome::Registered { faces: 1, .. }), "{:?}", outcome);
        assert_eq!(db.count_images().unwrap(), 1);
    }
}
