//! Scan run history.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;
use std::path::Path;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanRunStatus {
    Running,
    Completed,
    Failed,
}

impl ScanRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanRunStatus::Running => "running",
            ScanRunStatus::Completed => "completed",
            ScanRunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => ScanRunStatus::Completed,
            "failed" => ScanRunStatus::Failed,
            _ => ScanRunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub id: i64,
    pub directory: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub files_found: i64,
    pub images_new: i64,
    pub faces_new: i64,
    pub status: ScanRunStatus,
}

impl Database {
    pub fn begin_scan(&self, directory: &Path) -> Result<i64> {
        let dir_str = directory.to_string_lossy();
        self.conn.execute(
            "INSERT INTO scans (directory, status) VALUES (?, ?)",
            params![dir_str.as_ref(), ScanRunStatus::Running.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_scan(
        &self,
        scan_id: i64,
        files_found: usize,
        images_new: usize,
        faces_new: usize,
        status: ScanRunStatus,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE scans
            SET completed_at = CURRENT_TIMESTAMP, files_found = ?, images_new = ?, faces_new = ?, status = ?
            WHERE id = ?
            "#,
            params![
                files_found as i64,
                images_new as i64,
                faces_new as i64,
                status.as_str(),
                scan_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent scans first
    pub fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, directory, started_at, completed_at, files_found, images_new, faces_new, status
            FROM scans
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let scans = stmt
            .query_map([limit as i64], |row| {
                Ok(ScanRecord {
                    id: row.get(0)?,
                    directory: row.get(1)?,
                    started_at: row.get(2)?,
                    completed_at: row.get(3)?,
                    files_found: row.get(4)?,
                    images_new: row.get(5)?,
                    faces_new: row.get(6)?,
                    status: ScanRunStatus::parse(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_history() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let first = db.begin_scan(Path::new("/photos")).unwrap();
        db.finish_scan(first, 10, 4, 7, ScanRunStatus::Completed).unwrap();
        let second = db.begin_scan(Path::new("/photos")).unwrap();

        let scans = db.recent_scans(10).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].id, second);
        assert_eq!(scans[0].status, ScanRunStatus::Running);
        assert_eq!(scans[1].status, ScanRunStatus::Completed);
        assert_eq!(scans[1].files_found, 10);
        assert_eq!(scans[1].faces_new, 7);
        assert!(scans[1].completed_at.is_some());
    }
}
