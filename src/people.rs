//! Edits a user makes to people between scans.

use anyhow::{bail, Result};

use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// Another visible person already had the name; the faces moved there
    /// and the renamed person is now hidden
    Merged { into: i64 },
    NotFound,
}

/// Give `person_id` a new name. If a different visible person already uses
/// that name, the two are merged instead of creating a second person with
/// the same name.
pub fn rename_or_merge(db: &Database, person_id: i64, new_name: &str) -> Result<RenameOutcome> {
    let new_name = new_name.trim();
    if new_name.is_empty() {
        bail!("Name cannot be empty");
    }

    if db.get_person(person_id)?.is_none() {
        return Ok(RenameOutcome::NotFound);
    }

    let tx = db.transaction()?;
    let outcome = match db.find_visible_person_by_name(new_name, person_id)? {
        Some(target) => {
            let moved = db.move_faces(person_id, target)?;
            db.hide_person(person_id)?;
            tracing::info!(person_id, into = target, moved, "Merged person");
            RenameOutcome::Merged { into: target }
        }
        None => {
            db.rename_person(person_id, new_name)?;
            tracing::info!(person_id, name = new_name, "Renamed person");
            RenameOutcome::Renamed
        }
    };
    tx.commit()?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FaceBox, NewImage};
    use std::path::Path;

    fn db_with_people(count: usize) -> (Database, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let image_id = db
            .insert_image(&NewImage {
                path: Path::new("/photos/group.jpg"),
                fingerprint: "fp",
                captured_at: "2024-05-01 12:00:00",
                thumbnail_ref: None,
            })
            .unwrap();

        let bbox = FaceBox { top: 0, right: 10, bottom: 10, left: 0 };
        let people = (0..count)
            .map(|i| {
                let face = db.insert_face(image_id, &bbox, &[i as f32], None).unwrap();
                let person = db.create_person(&format!("Unknown {}", i + 1), face).unwrap();
                db.assign_faces_to_person(person, &[face]).unwrap();
                person
            })
            .collect();
        (db, people)
    }

    #[test]
    fn test_plain_rename() {
        let (db, people) = db_with_people(2);
        assert_eq!(rename_or_merge(&db, people[0], "  Alice ").unwrap(), RenameOutcome::Renamed);
        assert_eq!(db.get_person(people[0]).unwrap().unwrap().name, "Alice");
    }

    #[test]
    fn test_rename_to_existing_name_merges() {
        let (db, people) = db_with_people(2);
        rename_or_merge(&db, people[0], "Alice").unwrap();

        let outcome = rename_or_merge(&db, people[1], "Alice").unwrap();
        assert_eq!(outcome, RenameOutcome::Merged { into: people[0] });

        let alice = db.get_person(people[0]).unwrap().unwrap();
        assert_eq!(alice.face_count, 2);
        let merged = db.get_person(people[1]).unwrap().unwrap();
        assert!(merged.is_hidden);
        assert_eq!(merged.face_count, 0);
    }

    #[test]
    fn test_hidden_namesake_is_not_a_merge_target() {
        let (db, people) = db_with_people(2);
        rename_or_merge(&db, people[0], "Alice").unwrap();
        db.hide_person(people[0]).unwrap();

        assert_eq!(rename_or_merge(&db, people[1], "Alice").unwrap(), RenameOutcome::Renamed);
    }

    #[test]
    fn test_rename_to_own_name_is_a_rename() {
        let (db, people) = db_with_people(1);
        rename_or_merge(&db, people[0], "Alice").unwrap();
        assert_eq!(rename_or_merge(&db, people[0], "Alice").unwrap(), RenameOutcome::Renamed);
    }

    #[test]
    fn test_invalid_requests() {
        let (db, people) = db_with_people(1);
        assert!(rename_or_merge(&db, people[0], "   ").is_err());
        assert_eq!(rename_or_merge(&db, 999, "Alice").unwrap(), RenameOutcome::NotFound);
    }
}
