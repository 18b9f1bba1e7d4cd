//! One-shot transformation that parses a ZIP container and writes its
//! three sidecars plus any new blobs into the shared pool.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use sha1_smol::Sha1;

use crate::blobstore::BlobStore;
use crate::paths::{archive_name, meta_dir, sidecar_paths};
use crate::zip_records::{
    CentralDirectoryEntry, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    StreamItemHeader, DD_MARKER, FLAG_DATA_DESCRIPTOR,
};

/// How much of the file's tail to scan for an EOCD marker that isn't right
/// at the end (a trailing comment pushed it earlier).
const EOCD_SCAN_WINDOW: u64 = 65536 + EndOfCentralDirectory::SIZE as u64;

/// Outcome of attempting to explode one file.
pub enum ExplodeOutcome {
    /// Sidecars and blobs were written.
    Exploded { entries: usize },
    /// The file doesn't look like a ZIP archive (no EOCD record found); not
    /// treated as an error, matching the source's silent skip.
    NotAZip,
}

/// Explodes the archive at `archive_path` into sidecars and blobs under
/// `base`, sharding blob paths by `depth` leading hex nibbles.
pub fn explode(archive_path: &Path, base: &Path, depth: u32) -> Result<ExplodeOutcome> {
    let mut file = File::open(archive_path)
        .with_context(|| format!("opening archive {}", archive_path.display()))?;

    let Some(eocd) = locate_eocd(&mut file)? else {
        return Ok(ExplodeOutcome::NotAZip);
    };
    let filesize = file.stream_position()?;

    fs::create_dir_all(meta_dir(base))
        .with_context(|| format!("creating meta directory under {}", base.display()))?;
    fs::create_dir_all(base.join("data"))
        .with_context(|| format!("creating data directory under {}", base.display()))?;

    let name = archive_name(archive_path);
    let paths = sidecar_paths(base, &name);
    let blobs = BlobStore::new(base.to_path_buf(), depth);

    let mut jump = File::create(&paths.jump)
        .with_context(|| format!("creating {}", paths.jump.display()))?;
    let mut stream = File::create(&paths.stream)
        .with_context(|| format!("creating {}", paths.stream.display()))?;
    let mut dir = File::create(&paths.dir)
        .with_context(|| format!("creating {}", paths.dir.display()))?;

    crate::zip_records::JumpHeader {
        filesize,
        directory_offset: eocd.directory_offset as u64,
    }
    .write(&mut jump)?;

    file.seek(SeekFrom::Start(eocd.directory_offset as u64))?;

    let mut count = 0usize;
    for _ in 0..eocd.total_entries {
        let mut cde_buf = vec![0u8; CentralDirectoryEntry::SIZE];
        file.read_exact(&mut cde_buf)?;
        dir.write_all(&cde_buf)?;
        let cde = CentralDirectoryEntry::read(&mut std::io::Cursor::new(&cde_buf))?;

        let stream_offset = stream.stream_position()?;
        crate::zip_records::JumpEntry {
            archive_offset: cde.offset as u64,
            stream_offset,
        }
        .write(&mut jump)?;

        process_file(&mut file, &cde, &mut stream, &blobs)
            .with_context(|| format!("processing entry at offset {}", cde.offset))?;

        let trailer_len = cde.filename_len as usize
            + cde.extra_field_len as usize
            + cde.comment_len as usize;
        let mut trailer = vec![0u8; trailer_len];
        file.read_exact(&mut trailer)?;
        dir.write_all(&trailer)?;

        count += 1;
    }

    // Copy everything remaining, including the EOCD record itself.
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    dir.write_all(&rest)?;

    Ok(ExplodeOutcome::Exploded { entries: count })
}

/// Extracts one entry's payload by seeking to its Local File Header,
/// deduplicates it into the blob pool, and appends its stream item
/// (header + variable fields + optional descriptor) to `stream`.
fn process_file(
    file: &mut File,
    cde: &CentralDirectoryEntry,
    stream: &mut File,
    blobs: &BlobStore,
) -> Result<()> {
    let return_pos = file.stream_position()?;

    file.seek(SeekFrom::Start(cde.offset as u64))?;
    let lfh = LocalFileHeader::read(file)?;

    let var_len = lfh.filename_len as usize + lfh.extra_field_len as usize;
    let mut var_fields = vec![0u8; var_len];
    file.read_exact(&mut var_fields)?;

    // The Central Directory's size is authoritative; the LFH doesn't
    // always carry it when the entry used a streamed Data Descriptor.
    let mut payload = vec![0u8; cde.compressed_size as usize];
    file.read_exact(&mut payload)?;

    let mut hasher = Sha1::new();
    hasher.update(&payload);
    let digest = hasher.digest();
    let hex_sha = digest.to_string();
    let sha_bytes = digest.bytes();

    blobs
        .put(&hex_sha, &payload)
        .with_context(|| format!("storing blob {hex_sha}"))?;

    let descriptor = read_descriptor(file, lfh.flag)?;

    let header = StreamItemHeader {
        lfh,
        descriptor_len: descriptor.len() as u8,
        sha: sha_bytes,
    };
    header.write(stream)?;
    stream.write_all(&var_fields)?;
    if !descriptor.is_empty() {
        stream.write_all(&descriptor)?;
    }

    file.seek(SeekFrom::Start(return_pos))?;
    Ok(())
}

/// Reads a trailing Data Descriptor if present, exactly as the source
/// does: probe 4 bytes for the optional marker; if absent but the flag
/// says one was streamed, rewind and take those same 4 bytes as the start
/// of the 12-byte descriptor body.
fn read_descriptor(file: &mut File, flag: u16) -> Result<Vec<u8>> {
    let mut probe = [0u8; 4];
    let read = read_up_to(file, &mut probe)?;

    if read == 4 && probe == DD_MARKER {
        let mut body = [0u8; DataDescriptor::SIZE];
        file.read_exact(&mut body)?;
        let mut out = Vec::with_capacity(4 + DataDescriptor::SIZE);
        out.extend_from_slice(&DD_MARKER);
        out.extend_from_slice(&body);
        return Ok(out);
    }

    if flag & FLAG_DATA_DESCRIPTOR != 0 {
        file.seek(SeekFrom::Current(-(read as i64)))?;
        let mut body = vec![0u8; DataDescriptor::SIZE];
        file.read_exact(&mut body)?;
        return Ok(body);
    }

    file.seek(SeekFrom::Current(-(read as i64)))?;
    Ok(Vec::new())
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Locates the End of Central Directory record: first by seeking
/// directly to where it would sit if there's no trailing comment, then by
/// scanning the last `EOCD_SCAN_WINDOW` bytes for the marker.
pub fn locate_eocd(file: &mut File) -> Result<Option<EndOfCentralDirectory>> {
    let len = file.seek(SeekFrom::End(0))?;
    if len < EndOfCentralDirectory::SIZE as u64 {
        return Ok(None);
    }

    file.seek(SeekFrom::End(-(EndOfCentralDirectory::SIZE as i64)))?;
    let mut tail = [0u8; EndOfCentralDirectory::SIZE];
    file.read_exact(&mut tail)?;
    if let Ok(eocd) = EndOfCentralDirectory::read(&mut std::io::Cursor::new(&tail)) {
        file.seek(SeekFrom::End(0))?;
        return Ok(Some(eocd));
    }

    let scan_from = len.saturating_sub(EOCD_SCAN_WINDOW);
    file.seek(SeekFrom::Start(scan_from))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let Some((eocd, _)) = EndOfCentralDirectory::find_in(&buf) else {
        return Ok(None);
    };
    file.seek(SeekFrom::End(0))?;
    Ok(Some(eocd))
}
