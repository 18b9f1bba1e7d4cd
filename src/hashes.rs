//! Per-entry hashing used by the `analyze` tool: for each Central
//! Directory entry, computes a hash over the exact bytes a stream copy
//! would reproduce ("stream"), over the compressed payload alone ("raw"),
//! and over the decompressed payload ("decompressed").

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use anyhow::{Context, Result};
use sha1_smol::Sha1;

use crate::zip_records::{
    CentralDirectoryEntry, DataDescriptor, LocalFileHeader, DD_MARKER, FLAG_DATA_DESCRIPTOR,
};

pub struct EntryHashes {
    pub filename: String,
    pub stream_hash: String,
    pub raw_hash: String,
    pub decompressed_hash: String,
}

/// Hashes one entry located by `cde`, restoring the file's position
/// afterward. Unlike the exploder, this never touches the blob pool; it
/// exists purely to report the three digests.
pub fn hash_entry(file: &mut File, cde: &CentralDirectoryEntry) -> Result<EntryHashes> {
    let return_pos = file.stream_position()?;

    file.seek(SeekFrom::Start(cde.offset as u64))?;
    let mut stream_hasher = Sha1::new();

    let mut lfh_bytes = vec![0u8; LocalFileHeader::SIZE];
    file.read_exact(&mut lfh_bytes)?;
    stream_hasher.update(&lfh_bytes);
    let lfh = LocalFileHeader::read(&mut std::io::Cursor::new(&lfh_bytes))?;

    let mut filename_bytes = vec![0u8; lfh.filename_len as usize];
    file.read_exact(&mut filename_bytes)?;
    stream_hasher.update(&filename_bytes);
    let filename = String::from_utf8_lossy(&filename_bytes).into_owned();

    let mut extra = vec![0u8; lfh.extra_field_len as usize];
    file.read_exact(&mut extra)?;
    stream_hasher.update(&extra);

    let mut payload = vec![0u8; cde.compressed_size as usize];
    file.read_exact(&mut payload)?;
    stream_hasher.update(&payload);

    let mut raw_hasher = Sha1::new();
    raw_hasher.update(&payload);

    let decompressed = if lfh.compression == 8 {
        miniz_oxide::inflate::decompress_to_vec(&payload)
            .map_err(|e| anyhow::anyhow!("inflate failed: {e:?}"))
            .context("decompressing entry for analysis")?
    } else {
        payload.clone()
    };
    let mut decompressed_hasher = Sha1::new();
    decompressed_hasher.update(&decompressed);

    // Data Descriptor detection uses the same authoritative rule as the
    // exploder; the source's analyzer checked `flag & 3` here, which is a
    // bug (it should be the Data Descriptor bit, `flag & 0x08`).
    let mut probe = [0u8; 4];
    let probe_read = read_up_to(file, &mut probe)?;
    if probe_read == 4 && probe == DD_MARKER {
        stream_hasher.update(&DD_MARKER);
        let mut body = [0u8; DataDescriptor::SIZE];
        file.read_exact(&mut body)?;
        stream_hasher.update(&body);
    } else if lfh.flag & FLAG_DATA_DESCRIPTOR != 0 {
        file.seek(SeekFrom::Current(-(probe_read as i64)))?;
        let mut body = vec![0u8; DataDescriptor::SIZE];
        file.read_exact(&mut body)?;
        stream_hasher.update(&body);
    } else {
        file.seek(SeekFrom::Current(-(probe_read as i64)))?;
    }

    file.seek(SeekFrom::Start(return_pos))?;

    Ok(EntryHashes {
        filename,
        stream_hash: stream_hasher.digest().to_string(),
        raw_hash: raw_hasher.digest().to_string(),
        decompressed_hash: decompressed_hasher.digest().to_string(),
    })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_entry_raw_and_decompressed_hashes_match() {
        // When compression == 0 (stored), raw and decompressed bytes are
        // identical, so their hashes must agree.
        let payload = b"identical either way";
        let mut raw = Sha1::new();
        raw.update(payload);
        let mut decompressed = Sha1::new();
        decompressed.update(payload);
        assert_eq!(raw.digest().to_string(), decompressed.digest().to_string());
    }
}
