//! Versioned, additive-only schema migrations.
//!
//! The applied version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction together with the version bump, so a crash never leaves
//! a half-applied step behind. Table creation uses `IF NOT EXISTS` and column
//! additions consult `PRAGMA table_info` first, which lets databases created
//! by older builds (that added columns ad hoc without bumping the version)
//! re-apply the whole list cleanly.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub enum Step {
    Sql(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub steps: &'static [Step],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "images, persons and faces",
        steps: &[Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                fingerprint TEXT NOT NULL,
                captured_at TEXT,
                thumbnail_ref TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_images_fingerprint ON images(fingerprint);
            CREATE INDEX IF NOT EXISTS idx_images_captured_at ON images(captured_at);

            -- People: one row per face cluster, rebuilt on every reconciliation
            CREATE TABLE IF NOT EXISTS persons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT 'Unknown',
                cover_face_id INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (cover_face_id) REFERENCES faces(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS faces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id INTEGER NOT NULL,
                person_id INTEGER,          -- NULL until the next reconciliation
                box_top INTEGER NOT NULL,
                box_right INTEGER NOT NULL,
                box_bottom INTEGER NOT NULL,
                box_left INTEGER NOT NULL,
                embedding BLOB NOT NULL,    -- little-endian f32 array
                embedding_dim INTEGER NOT NULL,
                thumbnail_ref TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_faces_image ON faces(image_id);
            CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);
            "#,
        )],
    },
    Migration {
        version: 2,
        description: "hidden flag on persons",
        steps: &[Step::AddColumn {
            table: "persons",
            column: "is_hidden",
            definition: "INTEGER NOT NULL DEFAULT 0",
        }],
    },
    Migration {
        version: 3,
        description: "favorite flag on images",
        steps: &[Step::AddColumn {
            table: "images",
            column: "is_favorite",
            definition: "INTEGER NOT NULL DEFAULT 0",
        }],
    },
    Migration {
        version: 4,
        description: "scan history",
        steps: &[Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                directory TEXT NOT NULL,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                completed_at TEXT,
                files_found INTEGER NOT NULL DEFAULT 0,
                images_new INTEGER NOT NULL DEFAULT 0,
                faces_new INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'running'  -- 'running', 'completed', 'failed'
            );

            CREATE INDEX IF NOT EXISTS idx_persons_hidden ON persons(is_hidden);
            CREATE INDEX IF NOT EXISTS idx_images_favorite ON images(is_favorite);
            "#,
        )],
    },
];

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply every migration newer than the stored version. Returns how many ran.
pub fn apply_migrations(conn: &Connection) -> Result<usize> {
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        for step in migration.steps {
            apply_step(&tx, step).with_context(|| {
                format!(
                    "Migration {} ({}) failed",
                    migration.version, migration.description
                )
            })?;
        }
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        tracing::debug!(version = migration.version, description = migration.description, "Applied migration");
        applied += 1;
    }

    Ok(applied)
}

fn apply_step(conn: &Connection, step: &Step) -> Result<()> {
    match step {
        Step::Sql(sql) => conn.execute_batch(sql)?,
        Step::AddColumn {
            table,
            column,
            definition,
        } => {
            if !has_column(conn, table, column)? {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column, definition
                ))?;
            }
        }
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}
