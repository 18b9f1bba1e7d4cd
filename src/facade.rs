//! The virtual-archive façade: keeps a registry of open handles and a
//! lazily-populated cache of `ExplodedInfo`, and computes the POSIX-ish
//! metadata (`stat`) the FUSE bridge reports for each archive.

use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::cursor::{ExplodedInfo, ReconstitutionCursor};
use crate::paths::sidecar_paths;

/// Aggregated metadata for one exploded archive, derived from its three
/// sidecar files rather than from any single one of them.
#[derive(Debug, Clone)]
pub struct ArchiveStat {
    pub size: u64,
    pub mode_bits: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

struct Handle {
    cursor: Mutex<ReconstitutionCursor>,
}

/// Manages every open archive handle and the `ExplodedInfo` cache shared
/// across them. One façade instance backs an entire mount.
pub struct VirtualArchiveFacade {
    base: PathBuf,
    depth: u32,

    info_cache: Mutex<HashMap<String, Arc<ExplodedInfo>>>,
    handles: Mutex<HashMap<u64, Arc<Handle>>>,
    next_fh: Mutex<u64>,
}

impl VirtualArchiveFacade {
    pub fn new(base: impl Into<PathBuf>, depth: u32) -> Self {
        Self {
            base: base.into(),
            depth,
            info_cache: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            next_fh: Mutex::new(0),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn exploded_info(&self, name: &str) -> Result<Arc<ExplodedInfo>> {
        let mut cache = self.info_cache.lock().expect("info cache poisoned");
        if let Some(info) = cache.get(name) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(ExplodedInfo::load(&self.base, name)?);
        cache.insert(name.to_string(), Arc::clone(&info));
        Ok(info)
    }

    fn metafile_paths(&self, name: &str) -> Vec<PathBuf> {
        let paths = sidecar_paths(&self.base, name);
        vec![paths.dir, paths.stream, paths.jump]
    }

    /// Every archive currently exploded under this base, derived from the
    /// `.dir` sidecars present in `meta/`.
    pub fn list_archives(&self) -> Result<Vec<String>> {
        let meta = self.base.join("meta");
        let mut names = Vec::new();
        for entry in fs::read_dir(&meta)
            .with_context(|| format!("listing {}", meta.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(name) = file_name.strip_suffix(".dir") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Opens `name`, returning a new file handle id.
    pub fn open(&self, name: &str) -> Result<u64> {
        let info = self.exploded_info(name)?;
        let cursor = ReconstitutionCursor::open(&self.base, name, self.depth, info)?;

        let mut handles = self.handles.lock().expect("handle registry poisoned");
        let mut next_fh = self.next_fh.lock().expect("fh counter poisoned");
        if handles.is_empty() {
            *next_fh = 0;
        }
        let fh = *next_fh;
        *next_fh += 1;

        handles.insert(
            fh,
            Arc::new(Handle {
                cursor: Mutex::new(cursor),
            }),
        );
        Ok(fh)
    }

    /// Performs an atomic seek-then-read on an open handle.
    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let handle = {
            let handles = self.handles.lock().expect("handle registry poisoned");
            handles
                .get(&fh)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such open handle: {fh}"))?
        };

        let mut cursor = handle.cursor.lock().expect("cursor mutex poisoned");
        cursor.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; size];
        let mut total = 0;
        while total < size {
            let n = cursor.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    pub fn release(&self, fh: u64) {
        let mut handles = self.handles.lock().expect("handle registry poisoned");
        handles.remove(&fh);
    }

    /// Drops every cached `ExplodedInfo` unconditionally, matching the
    /// source's `destroy()`. Open handles are unaffected since each holds
    /// its own `Arc`.
    pub fn reset_info_cache(&self) {
        self.info_cache.lock().expect("info cache poisoned").clear();
    }

    /// Drops only cache entries no open handle still references, matching
    /// the source's `_release()` (a `WeakValueDictionary` rebuild that
    /// keeps entries kept alive elsewhere and drops the rest). Intended to
    /// be triggered periodically or on a signal like the source's SIGHUP
    /// handler, rather than on every unmount.
    pub fn release_unused_info(&self) {
        self.info_cache
            .lock()
            .expect("info cache poisoned")
            .retain(|_, info| Arc::strong_count(info) > 1);
    }

    pub fn stat(&self, name: &str) -> Result<ArchiveStat> {
        let info = self.exploded_info(name)?;
        let metas: Vec<Metadata> = self
            .metafile_paths(name)
            .iter()
            .map(|p| fs::metadata(p).with_context(|| format!("stat {}", p.display())))
            .collect::<Result<_>>()?;

        let mode_bits = metas
            .iter()
            .fold(0u32, |acc, m| acc | (mode_of(m) & 0o777));

        use std::os::unix::fs::MetadataExt;
        let first = &metas[0];

        Ok(ArchiveStat {
            size: info.filesize,
            mode_bits,
            uid: first.uid(),
            gid: first.gid(),
            nlink: metas.iter().map(|m| m.nlink()).min().unwrap_or(1),
            atime: metas
                .iter()
                .map(|m| m.accessed().unwrap_or(SystemTime::UNIX_EPOCH))
                .max()
                .unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: metas
                .iter()
                .map(|m| m.modified().unwrap_or(SystemTime::UNIX_EPOCH))
                .max()
                .unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: metas
                .iter()
                .map(|m| m.created().unwrap_or(SystemTime::UNIX_EPOCH))
                .max()
                .unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    /// Checks that all three sidecar files grant `mode`'s access bits,
    /// mirroring the source's "accessible iff every metafile is" rule.
    pub fn access(&self, name: &str, write_requested: bool) -> bool {
        if write_requested {
            return false;
        }
        self.metafile_paths(name)
            .iter()
            .all(|p| p.exists())
    }

    /// Applies `mode` to all three sidecar files, rolling back on partial
    /// failure so the trio never ends up with mismatched permissions.
    pub fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let files = self.metafile_paths(name);
        let mut previous = Vec::with_capacity(files.len());
        for f in &files {
            previous.push(fs::metadata(f)?.permissions());
        }

        for f in &files {
            if let Err(e) = fs::set_permissions(f, fs::Permissions::from_mode(mode)) {
                for (f, perm) in files.iter().zip(previous.iter()) {
                    let _ = fs::set_permissions(f, perm.clone());
                }
                return Err(e).context("chmod failed partway through sidecar trio, rolled back");
            }
        }
        Ok(())
    }

    /// Resolves a meta symlink for `name` into the logical target archive
    /// name, following the source's `X.jump -> Y.jump` convention exposed
    /// at the mount as `X -> Y`.
    pub fn readlink(&self, name: &str) -> Result<Option<String>> {
        for meta in self.metafile_paths(name) {
            let Ok(target) = fs::read_link(&meta) else {
                continue;
            };
            let meta_ext = meta.extension().and_then(|e| e.to_str());
            let target_ext = target.extension().and_then(|e| e.to_str());
            if let (Some(me), Some(te)) = (meta_ext, target_ext) {
                if me == te {
                    let stem = target.file_stem().map(|s| s.to_string_lossy().into_owned());
                    return Ok(stem);
                }
            }
        }
        Ok(None)
    }
}

#[cfg(unix)]
fn mode_of(m: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    m.permissions().mode()
}
