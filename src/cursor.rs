//! The reconstitution cursor: a seekable, byte-exact virtual view of an
//! exploded archive, sourcing bytes from the stream sidecar, the shared
//! blob pool, and the directory sidecar as it advances through four
//! states.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::blobstore::BlobStore;
use crate::paths::sidecar_paths;
use crate::seektree::SeekTree;
use crate::zip_records::{JumpEntry, JumpHeader, StreamItemHeader};

/// Everything needed to reconstitute one archive, loaded once from its
/// `.jump` sidecar and shared (read-only) across every open handle.
#[derive(Debug)]
pub struct ExplodedInfo {
    pub filesize: u64,
    pub directory_offset: u64,
    pub jump_tree: SeekTree,
}

impl ExplodedInfo {
    /// Loads jump-sidecar metadata for the archive named `name` under `base`.
    pub fn load(base: &Path, name: &str) -> Result<Self> {
        let paths = sidecar_paths(base, name);
        let mut f = File::open(&paths.jump)
            .with_context(|| format!("opening jump sidecar {}", paths.jump.display()))?;

        let header = JumpHeader::read(&mut f)
            .with_context(|| format!("reading jump header from {}", paths.jump.display()))?;

        let mut entries = Vec::new();
        loop {
            match JumpEntry::read(&mut f) {
                Ok(e) => entries.push(e),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("reading jump entries from {}", paths.jump.display())
                    })
                }
            }
        }

        Ok(Self {
            filesize: header.filesize,
            directory_offset: header.directory_offset,
            jump_tree: SeekTree::build(entries),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Header,
    Data,
    Descriptor,
    Directory,
}

/// A `Read + Seek` view of one exploded archive's original bytes.
pub struct ReconstitutionCursor {
    info: Arc<ExplodedInfo>,
    blobs: BlobStore,

    stream: File,
    dir: File,

    cursor: u64,
    offset: usize,
    state: CursorState,

    stream_offset: Option<u64>,
    zip_header: Vec<u8>,
    descriptor: Vec<u8>,

    data: Option<File>,
    data_path: PathBuf,
    data_len: u64,
}

impl ReconstitutionCursor {
    pub fn open(base: &Path, name: &str, depth: u32, info: Arc<ExplodedInfo>) -> Result<Self> {
        let paths = sidecar_paths(base, name);
        let stream = File::open(&paths.stream)
            .with_context(|| format!("opening stream sidecar {}", paths.stream.display()))?;
        let dir = File::open(&paths.dir)
            .with_context(|| format!("opening directory sidecar {}", paths.dir.display()))?;
        let blobs = BlobStore::new(base.to_path_buf(), depth);

        let mut cursor = Self {
            info,
            blobs,
            stream,
            dir,
            cursor: 0,
            offset: 0,
            state: CursorState::Header,
            stream_offset: None,
            zip_header: Vec::new(),
            descriptor: Vec::new(),
            data: None,
            data_path: PathBuf::new(),
            data_len: 0,
        };
        cursor.load_stream_item()?;
        Ok(cursor)
    }

    /// Reads the next stream item's header, variable fields, and optional
    /// descriptor starting at the stream file's current position, and
    /// records where its payload blob lives.
    fn load_stream_item(&mut self) -> Result<()> {
        self.data = None;

        let header = StreamItemHeader::read(&mut self.stream)
            .context("reading stream item header")?;

        let var_len = header.var_fields_len();
        let mut var_fields = vec![0u8; var_len];
        self.stream
            .read_exact(&mut var_fields)
            .context("reading stream item variable fields")?;

        let mut lfh_bytes = Vec::with_capacity(crate::zip_records::LocalFileHeader::SIZE);
        header.lfh.write(&mut lfh_bytes)?;

        self.zip_header = lfh_bytes;
        self.zip_header.extend_from_slice(&var_fields);

        let mut descriptor = vec![0u8; header.descriptor_len as usize];
        self.stream
            .read_exact(&mut descriptor)
            .context("reading stream item descriptor")?;
        self.descriptor = descriptor;

        let hex_sha = hex_encode(&header.sha);
        self.data_path = self.blobs.path_for(&hex_sha);
        self.data_len = 0;

        Ok(())
    }

    fn open_data_file(&mut self) -> Result<()> {
        let f = File::open(&self.data_path)
            .with_context(|| format!("opening blob {}", self.data_path.display()))?;
        self.data_len = f.metadata()?.len();
        self.data = Some(f);
        Ok(())
    }

    fn advance_past_descriptor(&mut self) -> Result<()> {
        if self.cursor >= self.info.directory_offset {
            self.state = CursorState::Directory;
            self.dir.seek(SeekFrom::Start(0))?;
            self.stream_offset = None;
            self.data = None;
        } else {
            self.state = CursorState::Header;
            self.offset = 0;
            self.stream_offset = Some(self.stream.stream_position()?);
            self.load_stream_item()?;
        }
        Ok(())
    }
}

impl Read for ReconstitutionCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.state {
                CursorState::Header => {
                    let prev = self.offset;
                    let avail = self.zip_header.len() - prev;
                    let take = avail.min(buf.len());
                    buf[..take].copy_from_slice(&self.zip_header[prev..prev + take]);
                    self.offset += take;
                    self.cursor += take as u64;

                    if self.offset >= self.zip_header.len() {
                        self.state = CursorState::Data;
                        if self.data.is_none() {
                            self.open_data_file()
                                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                        }
                    }

                    if take == 0 {
                        continue;
                    }
                    return Ok(take);
                }
                CursorState::Data => {
                    let data = self
                        .data
                        .as_mut()
                        .expect("data file opened before DATA state reads");
                    let read = data.read(buf)?;
                    self.cursor += read as u64;

                    if data.stream_position()? >= self.data_len {
                        self.state = CursorState::Descriptor;
                        self.offset = 0;
                    }

                    if read == 0 {
                        continue;
                    }
                    return Ok(read);
                }
                CursorState::Descriptor => {
                    let prev = self.offset;
                    let avail = self.descriptor.len() - prev;
                    let take = avail.min(buf.len());
                    buf[..take].copy_from_slice(&self.descriptor[prev..prev + take]);
                    self.offset += take;
                    self.cursor += take as u64;

                    if self.offset >= self.descriptor.len() {
                        self.advance_past_descriptor()
                            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    }

                    if take == 0 {
                        continue;
                    }
                    return Ok(take);
                }
                CursorState::Directory => {
                    let read = self.dir.read(buf)?;
                    self.cursor += read as u64;
                    return Ok(read);
                }
            }
        }
    }
}

impl Seek for ReconstitutionCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(delta) => (self.cursor as i64 + delta) as u64,
            SeekFrom::End(delta) => (self.info.filesize as i64 + delta) as u64,
        };

        if target == self.cursor {
            return Ok(target);
        }
        self.cursor = target;

        if target >= self.info.directory_offset {
            self.data = None;
            self.state = CursorState::Directory;
            self.stream_offset = None;
            self.dir
                .seek(SeekFrom::Start(target - self.info.directory_offset))?;
            return Ok(target);
        }

        let entry = self.info.jump_tree.find(target).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "offset before first archive entry")
        })?;
        let mut additional = target - entry.archive_offset;

        if self.stream_offset != Some(entry.stream_offset) {
            self.stream_offset = Some(entry.stream_offset);
            self.stream.seek(SeekFrom::Start(entry.stream_offset))?;
            self.load_stream_item()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }

        let header_len = self.zip_header.len() as u64;
        if additional < header_len {
            self.state = CursorState::Header;
            self.offset = additional as usize;
            return Ok(target);
        }

        additional -= header_len;
        self.state = CursorState::Data;
        if self.data.is_none() {
            self.open_data_file()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }

        if additional < self.data_len {
            self.data.as_mut().unwrap().seek(SeekFrom::Start(additional))?;
        } else {
            self.state = CursorState::Descriptor;
            self.offset = (additional - self.data_len) as usize;
        }

        Ok(target)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encode_matches_known_digest() {
        let bytes = [0xdeu8, 0xad, 0xbe, 0xef];
        assert_eq!(hex_encode(&bytes), "deadbeef");
    }
}
