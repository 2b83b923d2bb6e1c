mod schema;
pub mod faces;
pub mod images;
pub mod scans;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::time::Duration;

pub use faces::{
    is_placeholder_name, placeholder_name, Face, FaceBox, Person, PLACEHOLDER_NAME,
};
pub use images::{Image, NewImage};
pub use scans::{ScanRecord, ScanRunStatus};

/// How long a statement waits on a lock held by another connection
/// (the scan worker and CLI readers share one database file).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Bring the schema up to date. Safe to call on every startup.
    pub fn initialize(&self) -> Result<()> {
        let applied = schema::apply_migrations(&self.conn)?;
        if applied > 0 {
            tracing::info!(applied, version = schema::latest_version(), "Database schema upgraded");
        }
        Ok(())
    }

    /// Start a unit of work. Every `Database` method called before the
    /// returned transaction is committed runs inside it; dropping it rolls back.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }
}
