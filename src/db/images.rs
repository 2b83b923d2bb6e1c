//! Image rows: one per distinct file content.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

use super::Database;

/// A registered image
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    pub id: i64,
    pub path: String,
    pub fingerprint: String,
    pub captured_at: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub is_favorite: bool,
}

/// Values for a new image row
#[derive(Debug, Clone)]
pub struct NewImage<'a> {
    pub path: &'a Path,
    pub fingerprint: &'a str,
    pub captured_at: &'a str,
    pub thumbnail_ref: Option<&'a str>,
}

const IMAGE_COLUMNS: &str = "id, path, fingerprint, captured_at, thumbnail_ref, is_favorite";

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        path: row.get(1)?,
        fingerprint: row.get(2)?,
        captured_at: row.get(3)?,
        thumbnail_ref: row.get(4)?,
        is_favorite: row.get::<_, i64>(5)? != 0,
    })
}

impl Database {
    /// Whether any image with this content fingerprint has been registered
    pub fn is_known_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let known = self
            .conn
            .query_row(
                "SELECT 1 FROM images WHERE fingerprint = ? LIMIT 1",
                [fingerprint],
                |_| Ok(()),
            )
            .optional()?;
        Ok(known.is_some())
    }

    pub fn image_id_for_path(&self, path: &Path) -> Result<Option<i64>> {
        let path_str = path.to_string_lossy();
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM images WHERE path = ?",
                [path_str.as_ref()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn insert_image(&self, image: &NewImage<'_>) -> Result<i64> {
        let path_str = image.path.to_string_lossy();
        self.conn.execute(
            "INSERT INTO images (path, fingerprint, captured_at, thumbnail_ref) VALUES (?, ?, ?, ?)",
            params![
                path_str.as_ref(),
                image.fingerprint,
                image.captured_at,
                image.thumbnail_ref,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_image(&self, image_id: i64) -> Result<Option<Image>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM images WHERE id = ?", IMAGE_COLUMNS),
                [image_id],
                image_from_row,
            )
            .optional()?)
    }

    /// All images, newest capture first
    pub fn list_images(&self) -> Result<Vec<Image>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM images ORDER BY captured_at DESC, id",
            IMAGE_COLUMNS
        ))?;
        let images = stmt
            .query_map([], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    pub fn count_images(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?)
    }

    /// Set or clear the favorite flag. Returns false if the image does not exist.
    pub fn set_favorite(&self, image_id: i64, favorite: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET is_favorite = ? WHERE id = ?",
            params![favorite as i64, image_id],
        )?;
        Ok(changed > 0)
    }

    pub fn favorite_images(&self) -> Result<Vec<Image>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM images WHERE is_favorite = 1 ORDER BY captured_at DESC, id",
            IMAGE_COLUMNS
        ))?;
        let images = stmt
            .query_map([], image_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn new_image<'a>(path: &'a Path, fingerprint: &'a str) -> NewImage<'a> {
        NewImage {
            path,
            fingerprint,
            captured_at: "2024-05-01 10:00:00",
            thumbnail_ref: None,
        }
    }

    #[test]
    fn test_fingerprint_lookup() {
        let db = test_db();
        assert!(!db.is_known_fingerprint("abc").unwrap());

        db.insert_image(&new_image(Path::new("/photos/a.jpg"), "abc")).unwrap();

        assert!(db.is_known_fingerprint("abc").unwrap());
        assert!(!db.is_known_fingerprint("def").unwrap());
        assert!(db.image_id_for_path(Path::new("/photos/a.jpg")).unwrap().is_some());
    }

    #[test]
    fn test_path_is_unique() {
        let db = test_db();
        db.insert_image(&new_image(Path::new("/photos/a.jpg"), "abc")).unwrap();
        assert!(db.insert_image(&new_image(Path::new("/photos/a.jpg"), "def")).is_err());
    }

    #[test]
    fn test_favorites() {
        let db = test_db();
        let id = db.insert_image(&new_image(Path::new("/photos/a.jpg"), "abc")).unwrap();
        db.insert_image(&new_image(Path::new("/photos/b.jpg"), "def")).unwrap();

        assert!(db.set_favorite(id, true).unwrap());
        assert!(!db.set_favorite(9999, true).unwrap());

        let favorites = db.favorite_images().unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, id);
        assert!(db.get_image(id).unwrap().unwrap().is_favorite);

        db.set_favorite(id, false).unwrap();
        assert!(db.favorite_images().unwrap().is_empty());
    }
}
