use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    time::UNIX_EPOCH,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SAMPLE_BYTES: u64 = 64 * 1024;

/// Cheap identity of a source file: size, head, tail and mtime hashed
/// together. Reading the whole file is avoided on purpose for large books.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub sha256: String,
    pub size: u64,
    pub mtime_ns: u64,
}

impl SourceFingerprint {
    /// `None` when the file cannot be read.
    pub fn compute(path: &Path) -> Option<Self> {
        let mut file = File::open(path).ok()?;
        let meta = file.metadata().ok()?;
        let size = meta.len();
        let mtime_ns = meta
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_nanos() as u64;

        let mut hasher = Sha256::new();
        hasher.update(size.to_le_bytes());

        let head_len = size.min(SAMPLE_BYTES);
        let mut buf = vec![0u8; head_len as usize];
        file.read_exact(&mut buf).ok()?;
        hasher.update(&buf);

        // Tail never overlaps the head.
        let tail_len = (size - head_len).min(SAMPLE_BYTES);
        if tail_len > 0 {
            file.seek(SeekFrom::Start(size - tail_len)).ok()?;
            buf.resize(tail_len as usize, 0);
            file.read_exact(&mut buf).ok()?;
            hasher.update(&buf);
        }

        hasher.update(mtime_ns.to_le_bytes());
        Some(Self {
            sha256: format!("{:x}", hasher.finalize()),
            size,
            mtime_ns,
        })
    }

    pub fn key(&self) -> &str {
        &self.sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn same_file_same_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.txt");
        fs::write(&path, "hello world").unwrap();
        let a = SourceFingerprint::compute(&path).unwrap();
        let b = SourceFingerprint::compute(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size, 11);
        assert_eq!(a.sha256.len(), 64);
    }

    #[test]
    fn head_and_tail_changes_are_seen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut data = vec![b'a'; 200 * 1024];
        fs::write(&path, &data).unwrap();
        let before = SourceFingerprint::compute(&path).unwrap();

        let last = data.len() - 1;
        data[last] = b'b';
        fs::write(&path, &data).unwrap();
        let tail_changed = SourceFingerprint::compute(&path).unwrap();
        assert_ne!(before.sha256, tail_changed.sha256);

        data[0] = b'c';
        fs::write(&path, &data).unwrap();
        let head_changed = SourceFingerprint::compute(&path).unwrap();
        assert_ne!(tail_changed.sha256, head_changed.sha256);
    }

    #[test]
    fn missing_file_has_no_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SourceFingerprint::compute(&dir.path().join("nope")).is_none());
    }

    #[test]
    fn empty_file_is_fingerprinted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        fs::write(&path, "").unwrap();
        assert_eq!(SourceFingerprint::compute(&path).unwrap().size, 0);
    }
}
