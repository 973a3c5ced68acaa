//! File fingerprints: (size, mtime, content hash) triples

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Identifies a file's content state.
///
/// Two fingerprints are considered equal when both the content hash and the
/// mtime match; size is informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFingerprint {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    /// Lowercase hex Sha256 of the full file content
    pub hash: String,
}

impl FileFingerprint {
    /// Read a file and compute its fingerprint.
    pub fn read(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read(path)?;
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(&content);
        let hash = hex::encode(hasher.finalize());

        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            size: metadata.len(),
            mtime,
            hash,
        })
    }

    /// Whether this fingerprint denotes the same content state as another.
    pub fn matches(&self, other: &FileFingerprint) -> bool {
        self.hash == other.hash && self.mtime == other.mtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_reflects_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "hello").unwrap();

        let fp1 = FileFingerprint::read(&path).unwrap();
        assert_eq!(fp1.size, 5);
        let fp2 = FileFingerprint::read(&path).unwrap();
        assert!(fp1.matches(&fp2));

        std::fs::write(&path, "changed").unwrap();
        let fp3 = FileFingerprint::read(&path).unwrap();
        assert_ne!(fp1.hash, fp3.hash);
        assert!(!fp1.matches(&fp3));
    }

    #[test]
    fn test_size_is_informational() {
        let a = FileFingerprint {
            path: "x".into(),
            size: 1,
            mtime: 10,
            hash: "h".into(),
        };
        let b = FileFingerprint { size: 2, ..a.clone() };
        assert!(a.matches(&b));
    }
}
