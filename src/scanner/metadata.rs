use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Storage format for capture timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Where a capture timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Exif,
    Modified,
    Now,
}

/// Capture time of the image: EXIF `DateTimeOriginal` when present and
/// parseable, else the file's modification time, else the current time.
/// Never fails.
pub fn derive_date(path: &Path) -> (NaiveDateTime, DateSource) {
    if let Some(taken) = exif_capture_time(path) {
        return (taken, DateSource::Exif);
    }

    if let Some(modified) = modified_time(path) {
        return (modified, DateSource::Modified);
    }

    tracing::debug!(path = %path.display(), "No capture or modification time, using now");
    (Local::now().naive_local(), DateSource::Now)
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn exif_capture_time(path: &Path) -> Option<NaiveDateTime> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    match field.value {
        exif::Value::Ascii(ref values) => {
            let raw = values.first()?;
            parse_exif_datetime(std::str::from_utf8(raw).ok()?)
        }
        _ => None,
    }
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` value, tolerating NUL padding
pub fn parse_exif_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(trimmed, EXIF_DATETIME_FORMAT).ok()
}

fn modified_time(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let local: DateTime<Local> = modified.into();
    Some(local.naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use tempfile::tempdir;

    #[test]
    fn test_parse_exif_datetime() {
        let parsed = parse_exif_datetime("2019:07:14 18:30:05\0").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2019, 7, 14));
        assert_eq!((parsed.hour(), parsed.minute(), parsed.second()), (18, 30, 5));
        assert_eq!(format_timestamp(&parsed), "2019-07-14 18:30:05");

        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_datetime("").is_none());
    }

    #[test]
    fn test_file_without_exif_uses_modification_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let (_, source) = derive_date(&path);
        assert_eq!(source, DateSource::Modified);
    }

    #[test]
    fn test_missing_file_still_yields_a_timestamp() {
        let dir = tempdir().unwrap();
        let (_, source) = derive_date(&dir.path().join("gone.jpg"));
        assert_eq!(source, DateSource::Now);
    }
}
