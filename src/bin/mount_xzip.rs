//! Exposes exploded zip file(s) as a read-only FUSE file system.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use libc::{EACCES, EINVAL, ENOENT, ENOTDIR};
use xzip::facade::VirtualArchiveFacade;
use xzip::vprintln;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INODE: u64 = 1;

/// Set by `handle_sighup` (async-signal-safe: only a relaxed store) and
/// drained on the next request, mirroring the source's
/// `signal.signal(SIGHUP, release)` hooking `ExplodedZip._release`.
static RELEASE_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sighup(_signum: i32) {
    RELEASE_REQUESTED.store(true, Ordering::SeqCst);
}

#[derive(Parser, Debug)]
#[command(about = "Mounts an exploded zip file system")]
struct Cli {
    /// Data subdirectory shard depth.
    #[arg(short = 'd', long, default_value_t = 0)]
    depth: u32,

    /// Enable FUSE debugging mode.
    #[arg(short = 'D', long)]
    debug: bool,

    /// Do not exit until the file system is unmounted.
    #[arg(short = 'f', long)]
    foreground: bool,

    /// Do not run in multi-threaded mode.
    #[arg(short = 's', long = "single-threaded")]
    single_threaded: bool,

    /// "Traditional" mount-style options: comma-separated `k=v` pairs, or a
    /// bare key treated as `k=true`. Repeatable; takes priority over the
    /// flags above when both set the same option.
    #[arg(short = 'o', action = clap::ArgAction::Append)]
    options: Vec<String>,

    /// Base for the exploded files.
    directory: PathBuf,

    /// Mount point.
    mount: PathBuf,
}

fn parse_o_options(options: &[String]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for item in options.join(",").split(',') {
        if item.is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((k, v)) => {
                out.insert(k.to_string(), v.to_string());
            }
            None => {
                out.insert(item.to_string(), "true".to_string());
            }
        }
    }
    out
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let opts = parse_o_options(&cli.options);

    if let Some(d) = opts.get("depth") {
        cli.depth = d.parse().context("parsing -o depth=...")?;
    }
    if opts.contains_key("debug") {
        cli.debug = true;
    }
    if opts.contains_key("foreground") {
        cli.foreground = true;
    }
    if opts.contains_key("nothread") {
        cli.single_threaded = true;
    }

    vprintln!(cli.debug as u8, 1, "mounting {} at {}", cli.directory.display(), cli.mount.display());

    unsafe {
        libc::signal(libc::SIGHUP, handle_sighup as libc::sighandler_t);
    }

    // single_threaded and foreground are accepted for command-line parity
    // with the source tool; mount2 already blocks the calling thread and
    // fuser already serializes per-request, so neither needs to be
    // threaded any further here.
    let fs = XzipFilesystem::new(cli.directory, cli.depth);
    let mount_options = vec![MountOption::RO, MountOption::FSName("xzip".to_string())];

    fuser::mount2(fs, &cli.mount, &mount_options)
        .with_context(|| format!("mounting {}", cli.mount.display()))?;
    Ok(())
}

struct XzipFilesystem {
    facade: VirtualArchiveFacade,
    load_time: SystemTime,
    inodes: std::sync::Mutex<HashMap<u64, String>>,
    names: std::sync::Mutex<HashMap<String, u64>>,
    next_inode: std::sync::Mutex<u64>,
}

impl XzipFilesystem {
    fn new(base: PathBuf, depth: u32) -> Self {
        Self {
            facade: VirtualArchiveFacade::new(base, depth),
            load_time: SystemTime::now(),
            inodes: std::sync::Mutex::new(HashMap::new()),
            names: std::sync::Mutex::new(HashMap::new()),
            next_inode: std::sync::Mutex::new(2),
        }
    }

    /// Drains a pending SIGHUP request, if any, by releasing cached
    /// `ExplodedInfo` no open handle still references.
    fn drain_release_request(&self) {
        if RELEASE_REQUESTED.swap(false, Ordering::SeqCst) {
            self.facade.release_unused_info();
        }
    }

    fn inode_for(&self, name: &str) -> u64 {
        let mut names = self.names.lock().expect("names map poisoned");
        if let Some(ino) = names.get(name) {
            return *ino;
        }
        let mut next = self.next_inode.lock().expect("inode counter poisoned");
        let ino = *next;
        *next += 1;
        names.insert(name.to_string(), ino);
        self.inodes
            .lock()
            .expect("inodes map poisoned")
            .insert(ino, name.to_string());
        ino
    }

    fn name_for(&self, ino: u64) -> Option<String> {
        if ino == ROOT_INODE {
            return Some(String::new());
        }
        self.inodes.lock().expect("inodes map poisoned").get(&ino).cloned()
    }

    fn root_attr(&self, uid: u32, gid: u32) -> FileAttr {
        FileAttr {
            ino: ROOT_INODE,
            size: 0,
            blocks: 0,
            atime: self.load_time,
            mtime: self.load_time,
            ctime: self.load_time,
            crtime: self.load_time,
            kind: FileType::Directory,
            perm: 0o555,
            nlink: 2,
            uid,
            gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, name: &str) -> Option<FileAttr> {
        let stat = self.facade.stat(name).ok()?;
        Some(FileAttr {
            ino,
            size: stat.size,
            blocks: stat.size.div_ceil(512),
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
            crtime: stat.ctime,
            kind: FileType::RegularFile,
            perm: stat.mode_bits as u16,
            nlink: stat.nlink as u32,
            uid: stat.uid,
            gid: stat.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        })
    }
}

impl Filesystem for XzipFilesystem {
    fn destroy(&mut self) {
        // Mirrors the source's own `destroy`, which drops all cached
        // `ExplodedInfo` (and, there, the handle table) on unmount.
        self.facade.reset_info_cache();
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.drain_release_request();
        if parent != ROOT_INODE {
            reply.error(ENOTDIR);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let ino = self.inode_for(name);
        match self.file_attr(ino, name) {
            Some(attr) => reply.entry(&TTL, &attr, 0),
            None => {
                let _ = req;
                reply.error(ENOENT)
            }
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        if ino == ROOT_INODE {
            reply.attr(&TTL, &self.root_attr(req.uid(), req.gid()));
            return;
        }
        match self.name_for(ino).and_then(|name| self.file_attr(ino, &name)) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(ENOENT),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(name) = self.name_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.facade.open(&name) {
            Ok(fh) => reply.opened(fh, 0),
            Err(_) => reply.error(ENOENT),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.facade.read(fh, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(_) => reply.error(ENOENT),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.facade.release(fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INODE {
            reply.error(ENOTDIR);
            return;
        }

        let Ok(names) = self.facade.list_archives() else {
            reply.error(ENOENT);
            return;
        };

        let mut entries = vec![
            (ROOT_INODE, FileType::Directory, ".".to_string()),
            (ROOT_INODE, FileType::Directory, "..".to_string()),
        ];
        for name in names {
            let ino = self.inode_for(&name);
            entries.push((ino, FileType::RegularFile, name));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyData) {
        let Some(name) = self.name_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        match self.facade.readlink(&name) {
            Ok(Some(target)) => reply.data(target.as_bytes()),
            Ok(None) => reply.error(EINVAL),
            Err(_) => reply.error(ENOENT),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        if ino == ROOT_INODE {
            reply.ok();
            return;
        }
        let write_requested = mask & libc::W_OK != 0;
        match self.name_for(ino) {
            Some(name) if self.facade.access(&name, write_requested) => reply.ok(),
            _ => reply.error(EACCES),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if ino == ROOT_INODE {
            reply.error(EACCES);
            return;
        }
        let Some(name) = self.name_for(ino) else {
            reply.error(ENOENT);
            return;
        };

        if let Some(mode) = mode {
            if self.facade.chmod(&name, mode).is_err() {
                reply.error(EACCES);
                return;
            }
        }

        match self.file_attr(ino, &name) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(ENOENT),
        }
        let _ = req;
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // Reports space information for the `meta/` directory's
        // filesystem, as the source tool does, via a direct statvfs(2)
        // call since only libc is on hand for this.
        match statvfs_meta(&self.facade.base().join("meta")) {
            Some(stat) => reply.statfs(
                stat.f_blocks,
                stat.f_bfree,
                stat.f_bavail,
                0,
                0,
                stat.f_bsize as u32,
                255,
                stat.f_bsize as u32,
            ),
            None => reply.error(ENOENT),
        }
    }
}

fn statvfs_meta(path: &std::path::Path) -> Option<libc::statvfs> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc == 0 {
        Some(stat)
    } else {
        None
    }
}
