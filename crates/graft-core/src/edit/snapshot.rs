//! Per-file snapshot guard
//!
//! Holds a file's byte content for the duration of one primitive. Dropped
//! silently on success; `restore` writes the original bytes back on a
//! failed postcondition, making every primitive atomic per file.

use std::io;
use std::path::{Path, PathBuf};

pub(crate) struct Snapshot {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl Snapshot {
    pub(crate) fn take(path: &Path, bytes: Vec<u8>) -> Self {
        Self {
            path: path.to_path_buf(),
            bytes,
        }
    }

    /// Write the pre-call bytes back to disk
    pub(crate) fn restore(&self) -> io::Result<()> {
        std::fs::write(&self.path, &self.bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_restore_is_bit_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.py");
        std::fs::write(&path, b"original\n").unwrap();

        let snapshot = Snapshot::take(&path, std::fs::read(&path).unwrap());
        std::fs::write(&path, b"mutated\n").unwrap();
        snapshot.restore().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"original\n");
    }
}
