use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// SHA-256 of the whole file as lowercase hex. This is the dedup key:
/// identical bytes at different paths share one fingerprint.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_fingerprint_depends_only_on_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("copy of a.jpg");
        let c = dir.path().join("c.jpg");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        std::fs::write(&c, b"other bytes").unwrap();

        let fa = fingerprint_file(&a).unwrap();
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, fingerprint_file(&b).unwrap());
        assert_eq!(fa, fingerprint_bytes(b"same bytes"));
        assert_ne!(fa, fingerprint_file(&c).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(fingerprint_file(&dir.path().join("gone.jpg")).is_err());
    }
}
