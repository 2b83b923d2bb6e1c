//! Database functions for detected faces and the person layer built on top of them.

use anyhow::Result;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::Database;

/// Name given to clusters nobody has named yet
pub const PLACEHOLDER_NAME: &str = "Unknown";

/// Placeholder for the `n`th unnamed cluster of a reconciliation pass
pub fn placeholder_name(n: usize) -> String {
    format!("{} {}", PLACEHOLDER_NAME, n)
}

/// Whether `name` was generated rather than chosen by a person.
/// Only `Unknown` and `Unknown <digits>` count; `Unknown Soldier` is a real name.
pub fn is_placeholder_name(name: &str) -> bool {
    match name.strip_prefix(PLACEHOLDER_NAME) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix(' ')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

/// Face bounding box as edge coordinates in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn area(&self) -> i32 {
        self.width().max(0) * self.height().max(0)
    }
}

/// A detected face in an image
#[derive(Debug, Clone)]
pub struct Face {
    pub id: i64,
    pub image_id: i64,
    pub person_id: Option<i64>,
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
    pub thumbnail_ref: Option<String>,
}

/// A person (one face cluster, possibly named)
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub cover_face_id: Option<i64>,
    pub is_hidden: bool,
    pub face_count: i64,
}

const FACE_COLUMNS: &str =
    "id, image_id, person_id, box_top, box_right, box_bottom, box_left, embedding, thumbnail_ref";

fn face_from_row(row: &Row<'_>) -> rusqlite::Result<Face> {
    let embedding: Vec<u8> = row.get(7)?;
    Ok(Face {
        id: row.get(0)?,
        image_id: row.get(1)?,
        person_id: row.get(2)?,
        bbox: FaceBox {
            top: row.get(3)?,
            right: row.get(4)?,
            bottom: row.get(5)?,
            left: row.get(6)?,
        },
        embedding: bytes_to_embedding(&embedding),
        thumbnail_ref: row.get(8)?,
    })
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        cover_face_id: row.get(2)?,
        is_hidden: row.get::<_, i64>(3)? != 0,
        face_count: row.get(4)?,
    })
}

const PERSON_SELECT: &str = r#"
    SELECT p.id, p.name, p.cover_face_id, p.is_hidden, COUNT(f.id) AS face_count
    FROM persons p
    LEFT JOIN faces f ON f.person_id = p.id
"#;

impl Database {
    // ========================================================================
    // Faces
    // ========================================================================

    /// Store a detected face. Faces start without a person.
    pub fn insert_face(
        &self,
        image_id: i64,
        bbox: &FaceBox,
        embedding: &[f32],
        thumbnail_ref: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO faces (image_id, box_top, box_right, box_bottom, box_left,
                               embedding, embedding_dim, thumbnail_ref)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                image_id,
                bbox.top,
                bbox.right,
                bbox.bottom,
                bbox.left,
                embedding_to_bytes(embedding),
                embedding.len() as i64,
                thumbnail_ref,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count_faces(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?)
    }

    pub fn get_face(&self, face_id: i64) -> Result<Option<Face>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM faces WHERE id = ?", FACE_COLUMNS),
                [face_id],
                face_from_row,
            )
            .optional()?)
    }

    /// Every face embedding in the store, in ascending face id
    pub fn all_face_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM faces ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, bytes_to_embedding(&bytes)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn faces_for_image(&self, image_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM faces WHERE image_id = ? ORDER BY id",
            FACE_COLUMNS
        ))?;
        let faces = stmt
            .query_map([image_id], face_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(faces)
    }

    pub fn faces_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM faces WHERE person_id = ? ORDER BY id",
            FACE_COLUMNS
        ))?;
        let faces = stmt
            .query_map([person_id], face_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(faces)
    }

    /// (face id, person name) for every face owned by a visible person
    pub fn visible_face_names(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.id, p.name
            FROM faces f
            JOIN persons p ON f.person_id = p.id
            WHERE p.is_hidden = 0
            ORDER BY f.id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // People
    // ========================================================================

    pub fn create_person(&self, name: &str, cover_face_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO persons (name, cover_face_id, is_hidden) VALUES (?, ?, 0)",
            params![name, cover_face_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn assign_faces_to_person(&self, person_id: i64, face_ids: &[i64]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE faces SET person_id = ? WHERE id = ?")?;
        for face_id in face_ids {
            stmt.execute(params![person_id, face_id])?;
        }
        Ok(())
    }

    /// Delete every person that is not hidden and detach their faces.
    /// Returns the number of persons removed.
    pub fn purge_visible_people(&self) -> Result<usize> {
        self.conn.execute(
            "UPDATE faces SET person_id = NULL WHERE person_id IN (SELECT id FROM persons WHERE is_hidden = 0)",
            [],
        )?;
        let removed = self
            .conn
            .execute("DELETE FROM persons WHERE is_hidden = 0", [])?;
        Ok(removed)
    }

    /// People with face counts, ordered by name. Hidden people only when asked.
    pub fn get_all_people(&self, include_hidden: bool) -> Result<Vec<Person>> {
        let filter = if include_hidden { "" } else { "WHERE p.is_hidden = 0" };
        let mut stmt = self.conn.prepare(&format!(
            "{} {} GROUP BY p.id ORDER BY p.name, p.id",
            PERSON_SELECT, filter
        ))?;
        let people = stmt
            .query_map([], person_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(people)
    }

    pub fn get_person(&self, person_id: i64) -> Result<Option<Person>> {
        Ok(self
            .conn
            .query_row(
                &format!("{} WHERE p.id = ? GROUP BY p.id", PERSON_SELECT),
                [person_id],
                person_from_row,
            )
            .optional()?)
    }

    /// A visible person other than `exclude_id` carrying exactly `name`
    pub fn find_visible_person_by_name(&self, name: &str, exclude_id: i64) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM persons WHERE name = ? AND id != ? AND is_hidden = 0 ORDER BY id LIMIT 1",
                params![name, exclude_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Returns false if the person does not exist
    pub fn rename_person(&self, person_id: i64, name: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE persons SET name = ? WHERE id = ?",
            params![name, person_id],
        )?;
        Ok(changed > 0)
    }

    /// Returns false if the person does not exist
    pub fn hide_person(&self, person_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE persons SET is_hidden = 1 WHERE id = ?",
            params![person_id],
        )?;
        Ok(changed > 0)
    }

    /// Reassign every face of `from` to `to`. Returns the number of faces moved.
    pub fn move_faces(&self, from: i64, to: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE faces SET person_id = ? WHERE person_id = ?",
            params![to, from],
        )?)
    }

    /// Distinct source paths of images that contain a face of any of `person_ids`
    pub fn image_paths_for_people(&self, person_ids: &[i64]) -> Result<Vec<String>> {
        if person_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; person_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT DISTINCT i.path
            FROM images i
            JOIN faces f ON i.id = f.image_id
            WHERE f.person_id IN ({})
            ORDER BY i.path
            "#,
            placeholders
        ))?;
        let paths = stmt
            .query_map(params_from_iter(person_ids.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert f32 slice to bytes for storage
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewImage;
    use std::path::Path;

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let image_id = db
            .insert_image(&NewImage {
                path: Path::new("/photos/a.jpg"),
                fingerprint: "abc",
                captured_at: "2024-05-01 10:00:00",
                thumbnail_ref: None,
            })
            .unwrap();
        (db, image_id)
    }

    const BOX: FaceBox = FaceBox { top: 10, right: 60, bottom: 70, left: 20 };

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder_name("Unknown"));
        assert!(is_placeholder_name("Unknown 1"));
        assert!(is_placeholder_name(&placeholder_name(42)));
        assert!(!is_placeholder_name("Unknown Soldier"));
        assert!(!is_placeholder_name("Unknown "));
        assert!(!is_placeholder_name("Alice"));
    }

    #[test]
    fn test_face_box_geometry() {
        assert_eq!(BOX.width(), 40);
        assert_eq!(BOX.height(), 60);
        assert_eq!(BOX.center(), (40, 40));
        assert_eq!(BOX.area(), 2400);
    }

    #[test]
    fn test_face_storage_keeps_embedding() {
        let (db, image_id) = test_db();
        let embedding = vec![0.25f32, -1.5, 3.0];
        let face_id = db.insert_face(image_id, &BOX, &embedding, Some("abc_face_0.jpg")).unwrap();

        let face = db.get_face(face_id).unwrap().unwrap();
        assert_eq!(face.embedding, embedding);
        assert_eq!(face.bbox, BOX);
        assert_eq!(face.person_id, None);
        assert_eq!(face.thumbnail_ref.as_deref(), Some("abc_face_0.jpg"));
        assert_eq!(db.all_face_embeddings().unwrap(), vec![(face_id, embedding)]);
    }

    #[test]
    fn test_purge_keeps_hidden_people() {
        let (db, image_id) = test_db();
        let f1 = db.insert_face(image_id, &BOX, &[0.0], None).unwrap();
        let f2 = db.insert_face(image_id, &BOX, &[1.0], None).unwrap();

        let visible = db.create_person("Alice", f1).unwrap();
        let hidden = db.create_person("Ghost", f2).unwrap();
        db.assign_faces_to_person(visible, &[f1]).unwrap();
        db.assign_faces_to_person(hidden, &[f2]).unwrap();
        db.hide_person(hidden).unwrap();

        assert_eq!(db.visible_face_names().unwrap(), vec![(f1, "Alice".to_string())]);

        assert_eq!(db.purge_visible_people().unwrap(), 1);
        assert!(db.get_person(visible).unwrap().is_none());
        assert_eq!(db.get_face(f1).unwrap().unwrap().person_id, None);

        let ghost = db.get_person(hidden).unwrap().unwrap();
        assert!(ghost.is_hidden);
        assert_eq!(ghost.face_count, 1);
    }

    #[test]
    fn test_people_listing_and_paths() {
        let (db, image_id) = test_db();
        let f1 = db.insert_face(image_id, &BOX, &[0.0], None).unwrap();
        let f2 = db.insert_face(image_id, &BOX, &[1.0], None).unwrap();
        let bob = db.create_person("Bob", f1).unwrap();
        let carol = db.create_person("Carol", f2).unwrap();
        db.assign_faces_to_person(bob, &[f1, f2]).unwrap();
        db.hide_person(carol).unwrap();

        let visible = db.get_all_people(false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].face_count, 2);
        assert_eq!(db.get_all_people(true).unwrap().len(), 2);

        assert_eq!(db.find_visible_person_by_name("Bob", carol).unwrap(), Some(bob));
        assert_eq!(db.find_visible_person_by_name("Bob", bob).unwrap(), None);
        assert_eq!(db.image_paths_for_people(&[bob]).unwrap(), vec!["/photos/a.jpg".to_string()]);
        assert!(db.image_paths_for_people(&[]).unwrap().is_empty());
    }
}
