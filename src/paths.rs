//! Shared path computation for sidecars and blobs, so no call site assembles
//! `meta/`/`data/` paths on its own. Depth is always threaded explicitly;
//! nothing here reads an implicit working directory.

use std::path::{Path, PathBuf};

/// The three sidecar files produced for each exploded archive, plus its
/// logical name within `meta/`.
#[derive(Debug, Clone)]
pub struct SidecarPaths {
    pub jump: PathBuf,
    pub stream: PathBuf,
    pub dir: PathBuf,
}

/// Name used for an archive's sidecar trio, derived from the archive's own
/// file name (including extension, so `game.zip` and `game.zip.bak` do not
/// collide).
pub fn archive_name(archive_path: &Path) -> String {
    archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive_path.to_string_lossy().into_owned())
}

pub fn meta_dir(base: &Path) -> PathBuf {
    base.join("meta")
}

pub fn data_dir(base: &Path) -> PathBuf {
    base.join("data")
}

pub fn sidecar_paths(base: &Path, name: &str) -> SidecarPaths {
    let meta = meta_dir(base);
    SidecarPaths {
        jump: meta.join(format!("{name}.jump")),
        stream: meta.join(format!("{name}.stream")),
        dir: meta.join(format!("{name}.dir")),
    }
}

/// Computes the on-disk path for a blob given its hex SHA-1 digest and the
/// configured shard depth. Depth 0 places every blob directly under
/// `data/`; depth N nests N single-hex-character directories first, e.g.
/// depth 2, hash `deadbeef...` -> `data/d/e/deadbeef...`.
pub fn blob_path(base: &Path, hex_sha: &str, depth: u32) -> PathBuf {
    let mut p = data_dir(base);
    let depth = depth as usize;
    for ch in hex_sha.chars().take(depth) {
        p.push(ch.to_string());
    }
    p.push(hex_sha);
    p
}

/// Directory components that must exist before a blob at `blob_path` can be
/// created.
pub fn blob_parent(base: &Path, hex_sha: &str, depth: u32) -> PathBuf {
    blob_path(base, hex_sha, depth)
        .parent()
        .expect("blob_path always has a parent")
        .to_path_buf()
}
