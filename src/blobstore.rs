//! Content-addressed blob pool. A blob's name is the hex SHA-1 of its
//! bytes; writes are write-if-absent, and the pool is never mutated once a
//! blob exists, so reads need no synchronization beyond the filesystem's
//! own guarantees.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::paths::{blob_parent, blob_path};

/// Handle to a base directory holding exploded archives' shared blob pool.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base: std::path::PathBuf,
    depth: u32,
}

impl BlobStore {
    pub fn new(base: impl Into<std::path::PathBuf>, depth: u32) -> Self {
        Self {
            base: base.into(),
            depth,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Full path a blob with this hex digest would live at.
    pub fn path_for(&self, hex_sha: &str) -> std::path::PathBuf {
        blob_path(&self.base, hex_sha, self.depth)
    }

    pub fn contains(&self, hex_sha: &str) -> bool {
        self.path_for(hex_sha).is_file()
    }

    /// Writes `bytes` under `hex_sha` unless a blob with that name already
    /// exists. Returns `true` if a new blob was written, `false` if it was
    /// already present (the dedup case).
    pub fn put(&self, hex_sha: &str, bytes: &[u8]) -> Result<bool> {
        let dest = self.path_for(hex_sha);
        if dest.is_file() {
            return Ok(false);
        }

        let parent = blob_parent(&self.base, hex_sha, self.depth);
        fs::create_dir_all(&parent)
            .with_context(|| format!("creating blob shard directory {}", parent.display()))?;

        // Write to a sibling temp file first so a reader never observes a
        // partially written blob under its final name.
        let tmp = parent.join(format!(".{hex_sha}.tmp"));
        {
            let mut f = File::create(&tmp)
                .with_context(|| format!("creating temp blob file {}", tmp.display()))?;
            f.write_all(bytes)
                .with_context(|| format!("writing blob {hex_sha}"))?;
        }
        match fs::rename(&tmp, &dest) {
            Ok(()) => Ok(true),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                if dest.is_file() {
                    // Lost a race with another explode of the same payload.
                    Ok(false)
                } else {
                    Err(e).with_context(|| format!("installing blob {hex_sha}"))
                }
            }
        }
    }

    /// Opens a blob for reading, returning the file and its length in bytes.
    pub fn open(&self, hex_sha: &str) -> Result<(File, u64)> {
        let path = self.path_for(hex_sha);
        let f = File::open(&path)
            .with_context(|| format!("opening blob {} at {}", hex_sha, path.display()))?;
        let len = f
            .metadata()
            .with_context(|| format!("statting blob {hex_sha}"))?
            .len();
        Ok((f, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_open_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path(), 2);
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let wrote = store.put(hex, b"hello world").unwrap();
        assert!(wrote);
        assert!(store.contains(hex));

        let (mut f, len) = store.open(hex).unwrap();
        assert_eq!(len, 11);
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut f, &mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn second_put_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path(), 0);
        let hex = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        assert!(store.put(hex, b"x").unwrap());
        assert!(!store.put(hex, b"x").unwrap());
    }

    #[test]
    fn shards_by_configured_depth() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path(), 1);
        let hex = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
        store.put(hex, b"payload").unwrap();
        assert!(dir.path().join("data").join("d").join(hex).is_file());
    }
}
